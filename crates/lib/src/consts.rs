//! Project-wide constants.

/// Application name, used in logs and generated files.
pub const APP_NAME: &str = "gantry";

/// File extension of build description files.
pub const DESCRIPTION_EXTENSION: &str = "gantry";

/// Per-directory output directory for objects, libraries and executables.
pub const BUILD_DIR: &str = "GantryBuild";

/// File name of the persisted timestamp store inside [`BUILD_DIR`].
pub const TIMESTAMPS_FILE: &str = "timestamps.ginfo";

/// Leading whitespace per nesting level (a tab counts as one level).
pub const INDENT_WIDTH: usize = 4;

/// Compiler name that must not receive the `-c` flag.
pub const NASM: &str = "nasm";

/// Name of the built-in build action; shadows user commands of the same name.
pub const BUILD_COMMAND: &str = "Build";

/// Command name that selects translation instead of building.
pub const GENERATE_COMMAND: &str = "generate";
