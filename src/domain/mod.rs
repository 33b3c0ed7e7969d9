pub mod payment;
pub mod payment_concept;
pub mod payment_event;
pub mod payment_method;
pub mod receipt;
pub mod user;

pub use payment::*;
pub use payment_concept::*;
pub use payment_event::*;
pub use payment_method::*;
pub use receipt::*;
pub use user::*;
