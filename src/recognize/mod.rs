//! Identification of the record currently playing.

pub mod command;
pub mod recognizer;

pub use command::{CommandExecutor, CommandRecognizer, SystemCommandExecutor};
pub use recognizer::{Identification, MockRecognizer, NullRecognizer, Recognizer};
