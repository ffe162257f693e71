pub mod credits;
pub mod memberships;
pub mod sessions;
