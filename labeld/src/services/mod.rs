//! Device access and the job queue.

pub mod print_queue;
pub mod printer;
