use crate::{
    auth::{CurrentActor, Role},
    errors::Error,
    types::{Operation, Resource, UserId},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

pub mod resource {
    use crate::types::Resource;

    // Resource types
    #[derive(Default)]
    pub struct Credits;

    #[derive(Default)]
    pub struct Memberships;

    #[derive(Default)]
    pub struct Sessions;

    #[derive(Default)]
    pub struct Plans;

    #[derive(Default)]
    pub struct Policies;

    // Convert type-level markers to enum values using Into
    impl From<Credits> for Resource {
        fn from(_: Credits) -> Resource {
            Resource::Credits
        }
    }
    impl From<Memberships> for Resource {
        fn from(_: Memberships) -> Resource {
            Resource::Memberships
        }
    }
    impl From<Sessions> for Resource {
        fn from(_: Sessions) -> Resource {
            Resource::Sessions
        }
    }
    impl From<Plans> for Resource {
        fn from(_: Plans) -> Resource {
            Resource::Plans
        }
    }
    impl From<Policies> for Resource {
        fn from(_: Policies) -> Resource {
            Resource::Policies
        }
    }
}

pub mod operation {
    use crate::types::Operation;

    // Operation types
    #[derive(Default)]
    pub struct CreateAll;

    #[derive(Default)]
    pub struct CreateOwn;

    #[derive(Default)]
    pub struct ReadAll;

    #[derive(Default)]
    pub struct ReadOwn;

    #[derive(Default)]
    pub struct UpdateAll;

    #[derive(Default)]
    pub struct UpdateOwn;

    impl From<CreateAll> for Operation {
        fn from(_: CreateAll) -> Operation {
            Operation::CreateAll
        }
    }
    impl From<CreateOwn> for Operation {
        fn from(_: CreateOwn) -> Operation {
            Operation::CreateOwn
        }
    }
    impl From<ReadAll> for Operation {
        fn from(_: ReadAll) -> Operation {
            Operation::ReadAll
        }
    }
    impl From<ReadOwn> for Operation {
        fn from(_: ReadOwn) -> Operation {
            Operation::ReadOwn
        }
    }
    impl From<UpdateAll> for Operation {
        fn from(_: UpdateAll) -> Operation {
            Operation::UpdateAll
        }
    }
    impl From<UpdateOwn> for Operation {
        fn from(_: UpdateOwn) -> Operation {
            Operation::UpdateOwn
        }
    }
}

/// Extractor that resolves the actor and requires one permission, expressed
/// at the type level so the route signature documents its access rule.
pub struct RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    pub actor: CurrentActor,
    _marker: PhantomData<(R, O)>,
}

impl<R, O, S> FromRequestParts<S> for RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let actor = CurrentActor::from_request_parts(parts, state).await?;

        let resource = R::default().into();
        let operation = O::default().into();

        if has_permission(&actor, resource, operation) {
            Ok(RequiresPermission {
                actor,
                _marker: PhantomData,
            })
        } else {
            Err(Error::InsufficientPermissions { resource, operation })
        }
    }
}

// Implement Deref so RequiresPermission<R, O> behaves like CurrentActor
impl<R, O> std::ops::Deref for RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    type Target = CurrentActor;

    fn deref(&self) -> &Self::Target {
        &self.actor
    }
}

/// Check if an actor has permission to perform an operation on a resource
pub fn has_permission(actor: &CurrentActor, resource: Resource, operation: Operation) -> bool {
    role_has_permission(actor.role, resource, operation)
}

/// Check if a role grants permission for a resource/operation
pub fn role_has_permission(role: Role, resource: Resource, operation: Operation) -> bool {
    match role {
        // Admin and Manager run the business: full access within the tenant.
        Role::Admin | Role::Manager => true,
        Role::Trainer => {
            matches!(
                (resource, operation),
                (Resource::Sessions, _)                           // Runs the session lifecycle
                    | (Resource::Credits, Operation::ReadAll)     // Can check a customer's balance
                    | (Resource::Memberships, Operation::ReadAll) // Can look up membership standing
                    | (Resource::Plans, Operation::ReadAll)
            )
        }
        Role::Member => {
            matches!(
                (resource, operation),
                (Resource::Credits, Operation::ReadOwn)           // Own balance and ledger
                    | (Resource::Sessions, Operation::ReadOwn)
                    | (Resource::Sessions, Operation::CreateOwn)  // Book own sessions
                    | (Resource::Sessions, Operation::UpdateOwn)  // Cancel own sessions
                    | (Resource::Memberships, Operation::ReadOwn)
                    | (Resource::Memberships, Operation::UpdateOwn) // Freeze/unfreeze own membership
                    | (Resource::Plans, Operation::ReadAll)       // Plans are tenant-public
            )
        }
    }
}

/// An Own-scoped actor may only touch resources they are a party to.
pub fn owns_or_can_read_all(actor: &CurrentActor, resource: Resource, owner: UserId) -> bool {
    if has_permission(actor, resource, Operation::ReadAll) {
        return true;
    }
    actor.user_id == owner && has_permission(actor, resource, Operation::ReadOwn)
}

/// Only the trainer a session belongs to, or a manager/admin, may mark a
/// no-show. Other trainers in the tenant can read the session but must not
/// judge attendance on it.
pub fn can_mark_no_show(actor: &CurrentActor, owning_trainer: UserId) -> bool {
    match actor.role {
        Role::Admin | Role::Manager => true,
        Role::Trainer => actor.user_id == owning_trainer,
        Role::Member => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn actor(role: Role) -> CurrentActor {
        CurrentActor {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn admin_and_manager_have_full_access() {
        for role in [Role::Admin, Role::Manager] {
            assert!(role_has_permission(role, Resource::Credits, Operation::CreateAll));
            assert!(role_has_permission(role, Resource::Policies, Operation::UpdateAll));
            assert!(role_has_permission(role, Resource::Memberships, Operation::UpdateAll));
        }
    }

    #[test]
    fn trainers_manage_sessions_but_not_the_ledger() {
        assert!(role_has_permission(Role::Trainer, Resource::Sessions, Operation::UpdateAll));
        assert!(role_has_permission(Role::Trainer, Resource::Credits, Operation::ReadAll));
        assert!(!role_has_permission(Role::Trainer, Resource::Credits, Operation::CreateAll));
        assert!(!role_has_permission(Role::Trainer, Resource::Policies, Operation::UpdateAll));
        assert!(!role_has_permission(Role::Trainer, Resource::Memberships, Operation::UpdateAll));
    }

    #[test]
    fn members_are_scoped_to_their_own_resources() {
        assert!(role_has_permission(Role::Member, Resource::Sessions, Operation::CreateOwn));
        assert!(role_has_permission(Role::Member, Resource::Credits, Operation::ReadOwn));
        assert!(!role_has_permission(Role::Member, Resource::Credits, Operation::ReadAll));
        assert!(!role_has_permission(Role::Member, Resource::Sessions, Operation::UpdateAll));
        assert!(!role_has_permission(Role::Member, Resource::Policies, Operation::ReadAll));
    }

    #[test]
    fn own_scope_requires_matching_identity() {
        let member = actor(Role::Member);
        assert!(owns_or_can_read_all(&member, Resource::Credits, member.user_id));
        assert!(!owns_or_can_read_all(&member, Resource::Credits, Uuid::new_v4()));

        let manager = actor(Role::Manager);
        assert!(owns_or_can_read_all(&manager, Resource::Credits, Uuid::new_v4()));
    }

    #[test]
    fn no_show_is_limited_to_the_owning_trainer_or_management() {
        let trainer = actor(Role::Trainer);
        assert!(can_mark_no_show(&trainer, trainer.user_id));
        assert!(!can_mark_no_show(&trainer, Uuid::new_v4()), "a colleague's session is off limits");

        assert!(can_mark_no_show(&actor(Role::Manager), Uuid::new_v4()));
        assert!(can_mark_no_show(&actor(Role::Admin), Uuid::new_v4()));

        let member = actor(Role::Member);
        assert!(!can_mark_no_show(&member, member.user_id));
    }
}
