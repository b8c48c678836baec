//! 浏览器启动与连接

pub mod connection;
pub mod headless;

pub use connection::connect_new_page;
pub use headless::launch_browser;
