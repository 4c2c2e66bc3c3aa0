//! Names and markers shared across the crate.

/// Application name, used for data/cache directories.
pub const APP_NAME: &str = "kiln";

/// Environment variable overriding the content store root.
pub const STORE_ENV_VAR: &str = "KILN_STORE";

/// Marker file written last into a committed store object.
pub const OBJECT_COMPLETE_MARKER: &str = ".kiln-complete";

/// File name of the record part inside a store object.
pub const RECORD_FILE_NAME: &str = "record.bin";

/// Directory holding streamed parts inside a store object.
pub const STREAMS_DIR_NAME: &str = "streams";

/// File extension of asset description files.
pub const ASSET_FILE_EXTENSION: &str = "kasset";

/// Version of the store object marker format.
pub const MARKER_FORMAT_VERSION: u32 = 1;

/// Lock file at the store root.
pub const STORE_LOCK_FILE: &str = ".lock";
