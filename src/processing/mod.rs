pub mod dispatcher;
pub mod validator;

pub use dispatcher::process_order;
pub use validator::validate_order;
