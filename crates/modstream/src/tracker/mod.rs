//! Compact tracker engine for the ProTracker MOD family.
//!
//! Mirrors the shape of a classic module player: loaders are registered up
//! front, a loader turns bytes into a [`Module`], and a [`Player`] sequences
//! the module into the software mixer.

pub mod loader;
pub mod mixer;
pub mod module;
pub mod player;

pub use self::loader::{ModuleLoader, ProtrackerLoader, SoundtrackerLoader};
pub use self::mixer::MixerSettings;
pub use self::module::Module;
pub use self::player::Player;

use crate::error::LoadError;
use crate::reader::{StreamReader, Whence};

/// Ask each loader in turn to recognize and parse `reader`.
pub fn load_module(
    loaders: &[Box<dyn ModuleLoader>],
    reader: &mut StreamReader,
    max_channels: usize,
) -> Result<Module, LoadError> {
    if reader.is_empty() {
        return Err(LoadError::Empty);
    }
    for loader in loaders {
        reader.seek(0, Whence::Set)?;
        if loader.test(reader) {
            reader.seek(0, Whence::Set)?;
            tracing::debug!(loader = loader.name(), "module format recognized");
            return loader.load(reader, max_channels);
        }
    }
    Err(LoadError::UnrecognizedFormat)
}
