pub mod dispatch_loop;
pub mod progress;
