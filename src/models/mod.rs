mod notification;
mod order;
mod payment;

pub use notification::*;
pub use order::*;
pub use payment::*;
