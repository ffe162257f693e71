pub mod credits;
pub mod memberships;
pub mod policies;
pub mod sessions;
