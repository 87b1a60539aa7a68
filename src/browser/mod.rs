//! Browser automation
//!
//! The login state machine talks to the browser through the [`LoginPage`]
//! capability trait; [`ChromeSession`] is the Chrome DevTools Protocol
//! implementation used by the binary.

mod errors;
mod page;
mod session;

pub use errors::BrowserError;
pub use page::{LoginPage, SessionFactory};
pub use session::{BrowserSessionConfig, ChromeSession, ChromeSessionFactory};
