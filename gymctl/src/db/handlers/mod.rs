pub mod credits;
pub mod memberships;
pub mod policies;
pub mod sessions;

pub use credits::Credits;
pub use memberships::Memberships;
pub use policies::Policies;
pub use sessions::Sessions;
