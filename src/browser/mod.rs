pub mod chrome;

pub use chrome::{ChromeDriver, ConnectionMode, Viewport};
