//! Two-step admin handoff shared by both contracts.
//!
//! The current admin nominates a successor, and the successor must accept
//! before the admin key moves. Storage keys are supplied by the caller so
//! each contract keeps its own `DataKey` layout.

use soroban_sdk::{symbol_short, Address, Env, IntoVal, TryFromVal, Val};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdminError {
    NotInitialized,
    Unauthorized,
    NoPendingAdmin,
}

pub fn require_admin<K>(env: &Env, admin_key: &K, caller: &Address) -> Result<(), AdminError>
where
    K: IntoVal<Env, Val> + TryFromVal<Env, Val> + Clone,
{
    caller.require_auth();
    let stored: Address = env
        .storage()
        .instance()
        .get(admin_key)
        .ok_or(AdminError::NotInitialized)?;
    if *caller != stored {
        return Err(AdminError::Unauthorized);
    }
    Ok(())
}

pub fn propose_admin<K>(
    env: &Env,
    admin_key: &K,
    pending_key: &K,
    current_admin: Address,
    new_admin: Address,
) -> Result<(), AdminError>
where
    K: IntoVal<Env, Val> + TryFromVal<Env, Val> + Clone,
{
    require_admin(env, admin_key, &current_admin)?;
    env.storage().instance().set(pending_key, &new_admin);

    env.events().publish(
        (symbol_short!("admin"), symbol_short!("proposed")),
        (current_admin, new_admin),
    );
    Ok(())
}

pub fn accept_admin<K>(
    env: &Env,
    admin_key: &K,
    pending_key: &K,
    new_admin: Address,
) -> Result<(), AdminError>
where
    K: IntoVal<Env, Val> + TryFromVal<Env, Val> + Clone,
{
    new_admin.require_auth();
    let pending: Address = env
        .storage()
        .instance()
        .get(pending_key)
        .ok_or(AdminError::NoPendingAdmin)?;
    if new_admin != pending {
        return Err(AdminError::Unauthorized);
    }
    env.storage().instance().set(admin_key, &new_admin);
    env.storage().instance().remove(pending_key);

    env.events()
        .publish((symbol_short!("admin"), symbol_short!("accepted")), new_admin);
    Ok(())
}
