pub mod bridge;
pub mod invoker;
pub mod remote;
pub mod request;
