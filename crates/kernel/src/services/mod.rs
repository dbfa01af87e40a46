//! Resource services.
//!
//! Each API resource (tours, users, reviews, bookings) is a [`Resource`]
//! over its collection. Services own validation, visibility rules,
//! reference population and the follow-up work of writes.

pub mod bookings;
pub mod resource;
pub mod reviews;
pub mod tours;
pub mod users;
pub mod validate;

pub use bookings::BookingService;
pub use resource::{Populate, Resource, WriteReceipt};
pub use reviews::ReviewService;
pub use tours::TourService;
pub use users::UserService;
