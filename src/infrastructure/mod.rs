pub mod bluetooth;
pub mod logging;
pub mod publisher;
pub mod report_queue;
pub mod serial;
