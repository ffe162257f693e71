use std::fmt;
use uuid::Uuid;

// Type aliases for IDs
pub type TenantId = Uuid;
pub type UserId = Uuid;
pub type PlanId = Uuid;
pub type MembershipId = Uuid;
pub type BatchId = Uuid;
pub type SessionId = Uuid;
pub type FreezeIntervalId = Uuid;
pub type OrderId = Uuid;

// Operations that can be performed on resources
// *-All means unrestricted access within the tenant, *-Own means restricted
// to resources the actor is a party to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAll,
    CreateOwn,
    ReadAll,
    ReadOwn,
    UpdateAll,
    UpdateOwn,
}

// Resources that can be operated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Credits,
    Memberships,
    Sessions,
    Plans,
    Policies,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateAll | Operation::CreateOwn => write!(f, "Create"),
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
            Operation::UpdateAll | Operation::UpdateOwn => write!(f, "Update"),
        }
    }
}
