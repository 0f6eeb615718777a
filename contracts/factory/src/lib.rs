#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, vec, Address, BytesN,
    Env, IntoVal, Symbol, Val, Vec,
};

use launchpool_shared::{mul_div, PoolKind, Role};

// Data Types

/// Registry-wide settings that pools consult at creation time
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FactoryConfig {
    /// default permit signer handed to newly registered pools
    pub signer: Address,
    /// shared emission budget in tokens per block; 0 means pools keep the
    /// rate they were created with
    pub emission_rate: i128,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    HasRole(Address, Role),
    Pools(PoolKind),
    WasmHash(PoolKind),
    AllocPoint(Address),
    TotalAllocPoint,
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum FactoryError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Forbidden = 3,
    UnknownPool = 4,
    InvalidAllocPoint = 5,
    Overflow = 6,
}

// Events

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoleChangedEvent {
    pub account: Address,
    pub role: Role,
    pub granted: bool,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolRegisteredEvent {
    pub pool: Address,
    pub kind: PoolKind,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocationChangedEvent {
    pub pool: Address,
    pub alloc_point: i128,
    pub total_alloc_point: i128,
    pub timestamp: u64,
}

#[contract]
pub struct PoolFactory;

#[contractimpl]
impl PoolFactory {
    /// Initialize the factory; the deployer becomes the first admin and the
    /// default permit signer
    pub fn initialize(env: Env, admin: Address) -> Result<(), FactoryError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(FactoryError::AlreadyInitialized);
        }

        admin.require_auth();

        let config = FactoryConfig {
            signer: admin.clone(),
            emission_rate: 0,
        };
        env.storage().instance().set(&DataKey::Config, &config);
        env.storage()
            .persistent()
            .set(&DataKey::HasRole(admin.clone(), Role::Admin), &true);
        env.storage().instance().set(&DataKey::TotalAllocPoint, &0i128);

        log!(&env, "Pool factory initialized by admin: {}", admin);

        Ok(())
    }

    /// Grant a role (admin only)
    pub fn grant_role(
        env: Env,
        caller: Address,
        account: Address,
        role: Role,
    ) -> Result<(), FactoryError> {
        caller.require_auth();
        Self::require_admin(&env, &caller)?;

        env.storage()
            .persistent()
            .set(&DataKey::HasRole(account.clone(), role), &true);

        let event = RoleChangedEvent {
            account,
            role,
            granted: true,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("role"),), event);

        Ok(())
    }

    /// Revoke a role (admin only)
    pub fn revoke_role(
        env: Env,
        caller: Address,
        account: Address,
        role: Role,
    ) -> Result<(), FactoryError> {
        caller.require_auth();
        Self::require_admin(&env, &caller)?;

        env.storage()
            .persistent()
            .remove(&DataKey::HasRole(account.clone(), role));

        let event = RoleChangedEvent {
            account,
            role,
            granted: false,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("role"),), event);

        Ok(())
    }

    pub fn has_role(env: Env, account: Address, role: Role) -> bool {
        env.storage()
            .persistent()
            .get(&DataKey::HasRole(account, role))
            .unwrap_or(false)
    }

    /// Admins and mods may operate pools (pause, close, change distributor)
    pub fn is_operator(env: Env, account: Address) -> bool {
        Self::has_role(env.clone(), account.clone(), Role::Admin)
            || Self::has_role(env, account, Role::Mod)
    }

    /// Called by a pool contract during its own initialization; relies on
    /// invoker-contract authorization, so only the pool itself can register
    pub fn register_pool(env: Env, pool: Address, kind: PoolKind) -> Result<(), FactoryError> {
        Self::config(&env)?;
        pool.require_auth();

        let mut pools: Vec<Address> = env
            .storage()
            .instance()
            .get(&DataKey::Pools(kind))
            .unwrap_or(vec![&env]);
        pools.push_back(pool.clone());
        env.storage().instance().set(&DataKey::Pools(kind), &pools);

        let event = PoolRegisteredEvent {
            pool: pool.clone(),
            kind,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("pool"),), event);

        log!(&env, "Registered pool {}", pool);

        Ok(())
    }

    pub fn pools(env: Env, kind: PoolKind) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::Pools(kind))
            .unwrap_or(vec![&env])
    }

    /// Store the implementation template for future pool deployments
    pub fn set_wasm_hash(
        env: Env,
        caller: Address,
        kind: PoolKind,
        hash: BytesN<32>,
    ) -> Result<(), FactoryError> {
        caller.require_auth();
        Self::require_admin(&env, &caller)?;

        env.storage().instance().set(&DataKey::WasmHash(kind), &hash);

        Ok(())
    }

    pub fn wasm_hash(env: Env, kind: PoolKind) -> Option<BytesN<32>> {
        env.storage().instance().get(&DataKey::WasmHash(kind))
    }

    /// Replace the global permit signer (admin only)
    pub fn set_signer(env: Env, caller: Address, signer: Address) -> Result<(), FactoryError> {
        caller.require_auth();
        Self::require_admin(&env, &caller)?;

        let mut config = Self::config(&env)?;
        config.signer = signer;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    pub fn signer(env: Env) -> Result<Address, FactoryError> {
        Ok(Self::config(&env)?.signer)
    }

    /// Change the shared emission budget. Every governed pool is settled at
    /// its old rate before the new one is pushed out.
    pub fn set_emission_rate(env: Env, caller: Address, rate: i128) -> Result<(), FactoryError> {
        caller.require_auth();
        Self::require_admin(&env, &caller)?;
        if rate < 0 {
            return Err(FactoryError::InvalidAllocPoint);
        }

        let mut config = Self::config(&env)?;
        config.emission_rate = rate;
        env.storage().instance().set(&DataKey::Config, &config);

        Self::rebalance(&env)?;

        Ok(())
    }

    /// Change one pool's share of the emission budget. All governed pools
    /// must fold in elapsed emission at their current rates first, otherwise
    /// the change would misattribute rewards retroactively.
    pub fn set_allocation_point(
        env: Env,
        caller: Address,
        pool: Address,
        points: i128,
    ) -> Result<(), FactoryError> {
        caller.require_auth();
        Self::require_admin(&env, &caller)?;
        if points < 0 {
            return Err(FactoryError::InvalidAllocPoint);
        }

        let pools = Self::pools(env.clone(), PoolKind::Allocation);
        if !pools.contains(&pool) {
            return Err(FactoryError::UnknownPool);
        }

        let old: i128 = env
            .storage()
            .instance()
            .get(&DataKey::AllocPoint(pool.clone()))
            .unwrap_or(0);
        let total: i128 = env
            .storage()
            .instance()
            .get(&DataKey::TotalAllocPoint)
            .unwrap_or(0);
        let new_total = total
            .checked_sub(old)
            .and_then(|t| t.checked_add(points))
            .ok_or(FactoryError::Overflow)?;

        env.storage()
            .instance()
            .set(&DataKey::AllocPoint(pool.clone()), &points);
        env.storage()
            .instance()
            .set(&DataKey::TotalAllocPoint, &new_total);

        Self::rebalance(&env)?;

        let event = AllocationChangedEvent {
            pool,
            alloc_point: points,
            total_alloc_point: new_total,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("alloc"),), event);

        Ok(())
    }

    pub fn alloc_point(env: Env, pool: Address) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::AllocPoint(pool))
            .unwrap_or(0)
    }

    pub fn total_alloc_point(env: Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::TotalAllocPoint)
            .unwrap_or(0)
    }

    pub fn get_config(env: Env) -> Result<FactoryConfig, FactoryError> {
        Self::config(&env)
    }

    // Internal helper functions

    fn config(env: &Env) -> Result<FactoryConfig, FactoryError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(FactoryError::NotInitialized)
    }

    fn require_admin(env: &Env, caller: &Address) -> Result<(), FactoryError> {
        if !Self::has_role(env.clone(), caller.clone(), Role::Admin) {
            return Err(FactoryError::Forbidden);
        }
        Ok(())
    }

    /// Settle every governed pool, then push each one's derived rate. The
    /// settle broadcast must complete before any rate changes hands.
    fn rebalance(env: &Env) -> Result<(), FactoryError> {
        let config = Self::config(env)?;
        if config.emission_rate == 0 {
            return Ok(());
        }

        let pools = Self::pools(env.clone(), PoolKind::Allocation);
        let total: i128 = env
            .storage()
            .instance()
            .get(&DataKey::TotalAllocPoint)
            .unwrap_or(0);

        let update_fn = Symbol::new(env, "update_pool");
        for pool in pools.iter() {
            env.invoke_contract::<()>(&pool, &update_fn, vec![env]);
        }

        if total == 0 {
            return Ok(());
        }

        let set_rate_fn = Symbol::new(env, "set_rate_per_block");
        for pool in pools.iter() {
            let points: i128 = env
                .storage()
                .instance()
                .get(&DataKey::AllocPoint(pool.clone()))
                .unwrap_or(0);
            let rate = mul_div(env, config.emission_rate, points, total)
                .ok_or(FactoryError::Overflow)?;
            let args: Vec<Val> = vec![
                env,
                env.current_contract_address().into_val(env),
                rate.into_val(env),
            ];
            env.invoke_contract::<()>(&pool, &set_rate_fn, args);
        }

        Ok(())
    }
}
