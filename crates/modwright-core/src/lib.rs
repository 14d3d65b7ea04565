pub mod identity;
pub mod version;

mod error;
mod flash;
mod prefs;

pub use error::{bounded_error_text, UpdateError, ERROR_MAX_LEN};
pub use flash::{pull_scoped, FileFlashStore, FlashMessage, FlashStore, MemoryFlashStore};
pub use prefs::{
    get_bool, set_bool, FilePrefStore, MemoryPrefStore, PrefStore, PREF_API_TOKEN,
    PREF_COM_ERROR_FLAGGED, PREF_LAST_UPDATED_MODULE, PREF_MODULES_TO_SHOW, PREF_MODULE_VERSION,
    PREF_ROLLBACK_ONGOING, SHOW_ALL, SHOW_INSTALLED, SHOW_NOT_INSTALLED,
};
