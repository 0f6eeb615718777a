#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, vec, Address,
    Env, Vec, U256,
};

use launchpool_factory::PoolFactoryClient;
use launchpool_shared::{
    acc_delta, accrued_since, contains_duplicate, mul_div, settled_value, valid_amount,
    AccrualSchedule, PoolKind, PoolState, Role, SharedPot, MAX_REWARD_TOKENS,
};

// Data Types

/// Pool parameters fixed at creation. One emission budget is split across
/// the reward tokens in proportion to `token_weights`; the same weights
/// normalize staked amounts into the shared stake weight.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocationConfig {
    pub factory: Address,
    pub stake_tokens: Vec<Address>,
    pub reward_tokens: Vec<Address>,
    pub token_weights: Vec<i128>,
    /// emission is scaled up by this factor until `bonus_end_block`
    pub bonus_multiplier: u64,
    pub start_block: u32,
    pub bonus_end_block: u32,
    pub lock_duration: u64,
    /// total stake weight the pool accepts; 0 = unbounded
    pub cap: i128,
    pub reward_distributor: Option<Address>,
    /// approves permit-gated entries; initialized from the factory signer
    pub signer: Address,
}

/// The pool-wide accrual checkpoint. `acc_reward_per_share` entries are
/// 1e18-scaled and only ever grow; they are kept at 256 bits because tiny
/// stake weights against large emissions overflow 128-bit intermediates.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GlobalAccrual {
    pub acc_reward_per_share: Vec<U256>,
    pub last_reward_block: u32,
    pub total_staked_weight: i128,
}

/// One position per depositor. `reward_debts` snapshots the share of the
/// accumulator already attributed at the last settlement; `pending_rewards`
/// carries settled-but-unclaimed amounts across withdrawals.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocationPosition {
    pub amounts: Vec<i128>,
    pub reward_debts: Vec<U256>,
    pub pending_rewards: Vec<i128>,
    pub joined_at: u64,
    pub nonce: u64,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    Paused,
    RatePerBlock,
    Accrual,
    TotalStaked,
    Position(Address),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum AllocationPoolError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Forbidden = 3,
    InvalidTokenLength = 4,
    DuplicateStakeToken = 5,
    InvalidWeight = 6,
    InvalidRate = 7,
    InvalidBlockWindow = 8,
    InvalidAmountLength = 9,
    InvalidAmount = 10,
    PoolFull = 11,
    StillLocked = 12,
    InsufficientStake = 13,
    InvalidDistributor = 14,
    RecoverStakedToken = 15,
    NotPermitted = 16,
    Paused = 17,
    Overflow = 18,
}

// Events

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositEvent {
    pub user: Address,
    pub amounts: Vec<i128>,
    pub staked_weight: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawEvent {
    pub user: Address,
    pub amounts: Vec<i128>,
    pub staked_weight: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimEvent {
    pub user: Address,
    pub rewards: Vec<i128>,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmergencyWithdrawEvent {
    pub user: Address,
    pub amounts: Vec<i128>,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateChangedEvent {
    pub rate_per_block: i128,
    pub block: u32,
}

#[contract]
pub struct AllocationPool;

#[contractimpl]
impl AllocationPool {
    /// Initialize the pool and register it with the factory. The deployer
    /// must hold the factory admin role.
    pub fn initialize(
        env: Env,
        deployer: Address,
        factory: Address,
        stake_tokens: Vec<Address>,
        reward_tokens: Vec<Address>,
        token_weights: Vec<i128>,
        rate_per_block: i128,
        bonus_multiplier: u64,
        start_block: u32,
        bonus_end_block: u32,
        lock_duration: u64,
        cap: i128,
        reward_distributor: Option<Address>,
    ) -> Result<(), AllocationPoolError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(AllocationPoolError::AlreadyInitialized);
        }

        deployer.require_auth();

        let registry = PoolFactoryClient::new(&env, &factory);
        if !registry.has_role(&deployer, &Role::Admin) {
            return Err(AllocationPoolError::Forbidden);
        }

        let count = stake_tokens.len();
        if count == 0 || count > MAX_REWARD_TOKENS || reward_tokens.len() != count {
            return Err(AllocationPoolError::InvalidTokenLength);
        }
        if token_weights.len() != count {
            return Err(AllocationPoolError::InvalidTokenLength);
        }
        if contains_duplicate(&stake_tokens) {
            return Err(AllocationPoolError::DuplicateStakeToken);
        }
        for weight in token_weights.iter() {
            if weight <= 0 {
                return Err(AllocationPoolError::InvalidWeight);
            }
        }
        if rate_per_block < 0 {
            return Err(AllocationPoolError::InvalidRate);
        }
        if bonus_end_block < start_block {
            return Err(AllocationPoolError::InvalidBlockWindow);
        }
        if cap < 0 {
            return Err(AllocationPoolError::InvalidAmount);
        }

        let signer = registry.signer();
        let config = AllocationConfig {
            factory: factory.clone(),
            stake_tokens,
            reward_tokens,
            token_weights,
            bonus_multiplier,
            start_block,
            bonus_end_block,
            lock_duration,
            cap,
            reward_distributor,
            signer,
        };

        let current_block = env.ledger().sequence();
        let accrual = GlobalAccrual {
            acc_reward_per_share: Self::zero_shares(&env, count),
            last_reward_block: if start_block > current_block {
                start_block
            } else {
                current_block
            },
            total_staked_weight: 0,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::Accrual, &accrual);
        env.storage()
            .instance()
            .set(&DataKey::RatePerBlock, &rate_per_block);
        env.storage()
            .instance()
            .set(&DataKey::TotalStaked, &Self::zero_amounts(&env, count));

        registry.register_pool(&env.current_contract_address(), &PoolKind::Allocation);

        log!(&env, "Allocation pool initialized by {}", deployer);

        Ok(())
    }

    /// Fold emission since the last checkpoint into the accumulator. Public
    /// and unauthenticated: it is pure bookkeeping and idempotent within a
    /// ledger. Every state-changing entry point runs this first.
    pub fn update_pool(env: Env) -> Result<(), AllocationPoolError> {
        let config = Self::config(&env)?;
        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;
        env.storage().instance().set(&DataKey::Accrual, &accrual);
        Ok(())
    }

    /// Stake into the pool. A zero-amount deposit is a valid no-op used
    /// purely to trigger settlement.
    pub fn deposit(
        env: Env,
        user: Address,
        amounts: Vec<i128>,
    ) -> Result<(), AllocationPoolError> {
        user.require_auth();
        Self::deposit_internal(env, user, amounts, None)
    }

    /// Permit-gated variant: the configured signer co-authorizes the entry
    /// and the position nonce must match, each success consuming it
    pub fn deposit_with_permit(
        env: Env,
        user: Address,
        amounts: Vec<i128>,
        nonce: u64,
    ) -> Result<(), AllocationPoolError> {
        user.require_auth();
        let config = Self::config(&env)?;
        config.signer.require_auth();
        Self::deposit_internal(env, user, amounts, Some(nonce))
    }

    /// Withdraw staked principal. Pending rewards are settled and retained
    /// in the position; claiming pays them out.
    pub fn withdraw(
        env: Env,
        user: Address,
        amounts: Vec<i128>,
    ) -> Result<(), AllocationPoolError> {
        user.require_auth();
        Self::withdraw_internal(env, user, amounts, None)
    }

    pub fn withdraw_with_permit(
        env: Env,
        user: Address,
        amounts: Vec<i128>,
        nonce: u64,
    ) -> Result<(), AllocationPoolError> {
        user.require_auth();
        let config = Self::config(&env)?;
        config.signer.require_auth();
        Self::withdraw_internal(env, user, amounts, Some(nonce))
    }

    /// Pay out every reward token's settled pending amount
    pub fn claim_rewards(env: Env, user: Address) -> Result<(), AllocationPoolError> {
        user.require_auth();

        let config = Self::config(&env)?;
        if Self::paused(&env) {
            return Err(AllocationPoolError::Paused);
        }
        let distributor = config
            .reward_distributor
            .clone()
            .ok_or(AllocationPoolError::InvalidDistributor)?;

        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;
        let mut position = Self::position(&env, &user, &config);
        Self::settle_position(&env, &config, &accrual, &mut position)?;

        let rewards = position.pending_rewards.clone();
        for i in 0..config.reward_tokens.len() {
            let amount = rewards.get_unchecked(i);
            if amount > 0 {
                token::Client::new(&env, &config.reward_tokens.get_unchecked(i)).transfer_from(
                    &env.current_contract_address(),
                    &distributor,
                    &user,
                    &amount,
                );
            }
            position.pending_rewards.set(i, 0);
        }
        Self::refresh_debts(&env, &config, &accrual, &mut position)?;

        env.storage().instance().set(&DataKey::Accrual, &accrual);
        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);

        let event = ClaimEvent {
            user,
            rewards,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("claim"),), event);

        Ok(())
    }

    /// Return the full principal, forfeiting anything not yet claimed
    pub fn emergency_withdraw(env: Env, user: Address) -> Result<(), AllocationPoolError> {
        user.require_auth();

        let config = Self::config(&env)?;
        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;

        let mut position = Self::position(&env, &user, &config);
        let weight = Self::position_weight(&config, &position)?;
        let amounts = position.amounts.clone();

        let mut totals = Self::total_staked(env.clone());
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if amount > 0 {
                totals.set(i, totals.get_unchecked(i) - amount);
                token::Client::new(&env, &config.stake_tokens.get_unchecked(i)).transfer(
                    &env.current_contract_address(),
                    &user,
                    &amount,
                );
            }
            position.amounts.set(i, 0);
            position.pending_rewards.set(i, 0);
            position.reward_debts.set(i, U256::from_u32(&env, 0));
        }
        accrual.total_staked_weight -= weight;

        env.storage().instance().set(&DataKey::Accrual, &accrual);
        env.storage().instance().set(&DataKey::TotalStaked, &totals);
        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);

        let event = EmergencyWithdrawEvent {
            user,
            amounts,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("emergency"),), event);

        Ok(())
    }

    // Admin functions; roles live in the factory

    pub fn set_reward_distributor(
        env: Env,
        caller: Address,
        distributor: Option<Address>,
    ) -> Result<(), AllocationPoolError> {
        caller.require_auth();
        let mut config = Self::config(&env)?;
        Self::require_operator(&env, &config, &caller)?;

        config.reward_distributor = distributor;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    pub fn set_signer(
        env: Env,
        caller: Address,
        signer: Address,
    ) -> Result<(), AllocationPoolError> {
        caller.require_auth();
        let mut config = Self::config(&env)?;
        Self::require_admin(&env, &config, &caller)?;

        config.signer = signer;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    /// Change the emission rate. Elapsed blocks are folded in at the old
    /// rate first so the change is never retroactive. Accepts the factory
    /// (allocation-point rebalancing) or a factory admin.
    pub fn set_rate_per_block(
        env: Env,
        caller: Address,
        rate: i128,
    ) -> Result<(), AllocationPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        if caller != config.factory {
            Self::require_admin(&env, &config, &caller)?;
        }
        if rate < 0 {
            return Err(AllocationPoolError::InvalidRate);
        }

        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;
        env.storage().instance().set(&DataKey::Accrual, &accrual);
        env.storage().instance().set(&DataKey::RatePerBlock, &rate);

        let event = RateChangedEvent {
            rate_per_block: rate,
            block: env.ledger().sequence(),
        };
        env.events().publish((symbol_short!("rate"),), event);

        Ok(())
    }

    /// Send stranded tokens out of the contract. Stake collateral cannot
    /// leave while any of it is owed to depositors.
    pub fn recover_fund(
        env: Env,
        caller: Address,
        asset: Address,
        to: Address,
        amount: i128,
    ) -> Result<(), AllocationPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        Self::require_admin(&env, &config, &caller)?;
        if amount <= 0 {
            return Err(AllocationPoolError::InvalidAmount);
        }

        let totals = Self::total_staked(env.clone());
        for i in 0..config.stake_tokens.len() {
            if config.stake_tokens.get_unchecked(i) == asset && totals.get_unchecked(i) > 0 {
                return Err(AllocationPoolError::RecoverStakedToken);
            }
        }

        token::Client::new(&env, &asset).transfer(&env.current_contract_address(), &to, &amount);

        log!(&env, "Recovered {} of {} to {}", amount, asset, to);

        Ok(())
    }

    pub fn pause(env: Env, caller: Address) -> Result<(), AllocationPoolError> {
        Self::set_paused(env, caller, true)
    }

    pub fn unpause(env: Env, caller: Address) -> Result<(), AllocationPoolError> {
        Self::set_paused(env, caller, false)
    }

    // Getter functions

    /// Projection of what a settlement at the current block would leave
    /// claimable; bit-identical to the mutating path
    pub fn pending_token(env: Env, user: Address) -> Result<Vec<i128>, AllocationPoolError> {
        let config = Self::config(&env)?;
        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;
        let mut position = Self::position(&env, &user, &config);
        Self::settle_position(&env, &config, &accrual, &mut position)?;
        Ok(position.pending_rewards)
    }

    pub fn balance_of(env: Env, user: Address) -> Vec<i128> {
        match Self::config(&env) {
            Ok(config) => Self::position(&env, &user, &config).amounts,
            Err(_) => vec![&env],
        }
    }

    pub fn get_user_info(env: Env, user: Address) -> Result<AllocationPosition, AllocationPoolError> {
        let config = Self::config(&env)?;
        Ok(Self::position(&env, &user, &config))
    }

    pub fn nonce(env: Env, user: Address) -> u64 {
        match Self::config(&env) {
            Ok(config) => Self::position(&env, &user, &config).nonce,
            Err(_) => 0,
        }
    }

    pub fn total_staked_weight(env: Env) -> i128 {
        Self::accrual(&env).total_staked_weight
    }

    pub fn total_staked(env: Env) -> Vec<i128> {
        env.storage()
            .instance()
            .get(&DataKey::TotalStaked)
            .unwrap_or(vec![&env])
    }

    pub fn rate_per_block(env: Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::RatePerBlock)
            .unwrap_or(0)
    }

    pub fn get_accrual(env: Env) -> GlobalAccrual {
        Self::accrual(&env)
    }

    pub fn pool_state(env: Env) -> Result<PoolState, AllocationPoolError> {
        let config = Self::config(&env)?;
        if Self::paused(&env) {
            return Ok(PoolState::Closed);
        }
        if env.ledger().sequence() < config.start_block {
            return Ok(PoolState::NotStarted);
        }
        Ok(PoolState::Active)
    }

    pub fn get_config(env: Env) -> Result<AllocationConfig, AllocationPoolError> {
        Self::config(&env)
    }

    // Internal helper functions

    fn deposit_internal(
        env: Env,
        user: Address,
        amounts: Vec<i128>,
        expected_nonce: Option<u64>,
    ) -> Result<(), AllocationPoolError> {
        let config = Self::config(&env)?;
        if Self::paused(&env) {
            return Err(AllocationPoolError::Paused);
        }
        if amounts.len() != config.stake_tokens.len() {
            return Err(AllocationPoolError::InvalidAmountLength);
        }
        for amount in amounts.iter() {
            if !valid_amount(amount) {
                return Err(AllocationPoolError::InvalidAmount);
            }
        }

        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;

        let mut position = Self::position(&env, &user, &config);
        if let Some(nonce) = expected_nonce {
            if nonce != position.nonce {
                return Err(AllocationPoolError::NotPermitted);
            }
            position.nonce += 1;
        }
        Self::settle_position(&env, &config, &accrual, &mut position)?;

        let old_weight = Self::position_weight(&config, &position)?;
        let mut totals = Self::total_staked(env.clone());
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            let balance = position
                .amounts
                .get_unchecked(i)
                .checked_add(amount)
                .ok_or(AllocationPoolError::Overflow)?;
            position.amounts.set(i, balance);
            let total = totals
                .get_unchecked(i)
                .checked_add(amount)
                .ok_or(AllocationPoolError::Overflow)?;
            totals.set(i, total);
        }
        let new_weight = Self::position_weight(&config, &position)?;
        let total_weight = accrual
            .total_staked_weight
            .checked_add(new_weight - old_weight)
            .ok_or(AllocationPoolError::Overflow)?;
        if config.cap > 0 && total_weight > config.cap {
            return Err(AllocationPoolError::PoolFull);
        }
        accrual.total_staked_weight = total_weight;

        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if amount > 0 {
                token::Client::new(&env, &config.stake_tokens.get_unchecked(i)).transfer(
                    &user,
                    &env.current_contract_address(),
                    &amount,
                );
            }
        }

        Self::refresh_debts(&env, &config, &accrual, &mut position)?;
        position.joined_at = env.ledger().timestamp();

        env.storage().instance().set(&DataKey::Accrual, &accrual);
        env.storage().instance().set(&DataKey::TotalStaked, &totals);
        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);

        let event = DepositEvent {
            user,
            amounts,
            staked_weight: new_weight,
            timestamp: env.ledger().timestamp(),
        };
        env.events().publish((symbol_short!("deposit"),), event);

        Ok(())
    }

    fn withdraw_internal(
        env: Env,
        user: Address,
        amounts: Vec<i128>,
        expected_nonce: Option<u64>,
    ) -> Result<(), AllocationPoolError> {
        let config = Self::config(&env)?;
        if Self::paused(&env) {
            return Err(AllocationPoolError::Paused);
        }
        if amounts.len() != config.stake_tokens.len() {
            return Err(AllocationPoolError::InvalidAmountLength);
        }

        let now = env.ledger().timestamp();
        let mut position = Self::position(&env, &user, &config);
        if let Some(nonce) = expected_nonce {
            if nonce != position.nonce {
                return Err(AllocationPoolError::NotPermitted);
            }
            position.nonce += 1;
        }
        if now < position.joined_at + config.lock_duration {
            return Err(AllocationPoolError::StillLocked);
        }
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if !valid_amount(amount) {
                return Err(AllocationPoolError::InvalidAmount);
            }
            if amount > position.amounts.get_unchecked(i) {
                return Err(AllocationPoolError::InsufficientStake);
            }
        }

        let mut accrual = Self::accrual(&env);
        Self::update_accrual(&env, &config, &mut accrual)?;
        Self::settle_position(&env, &config, &accrual, &mut position)?;

        let old_weight = Self::position_weight(&config, &position)?;
        let mut totals = Self::total_staked(env.clone());
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if amount > 0 {
                position
                    .amounts
                    .set(i, position.amounts.get_unchecked(i) - amount);
                totals.set(i, totals.get_unchecked(i) - amount);
                token::Client::new(&env, &config.stake_tokens.get_unchecked(i)).transfer(
                    &env.current_contract_address(),
                    &user,
                    &amount,
                );
            }
        }
        let new_weight = Self::position_weight(&config, &position)?;
        accrual.total_staked_weight -= old_weight - new_weight;

        Self::refresh_debts(&env, &config, &accrual, &mut position)?;

        env.storage().instance().set(&DataKey::Accrual, &accrual);
        env.storage().instance().set(&DataKey::TotalStaked, &totals);
        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);

        let event = WithdrawEvent {
            user,
            amounts,
            staked_weight: new_weight,
            timestamp: now,
        };
        env.events().publish((symbol_short!("withdraw"),), event);

        Ok(())
    }

    fn config(env: &Env) -> Result<AllocationConfig, AllocationPoolError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(AllocationPoolError::NotInitialized)
    }

    fn accrual(env: &Env) -> GlobalAccrual {
        env.storage()
            .instance()
            .get(&DataKey::Accrual)
            .unwrap_or(GlobalAccrual {
                acc_reward_per_share: vec![env],
                last_reward_block: 0,
                total_staked_weight: 0,
            })
    }

    fn paused(env: &Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::Paused)
            .unwrap_or(false)
    }

    fn position(env: &Env, user: &Address, config: &AllocationConfig) -> AllocationPosition {
        env.storage()
            .persistent()
            .get(&DataKey::Position(user.clone()))
            .unwrap_or(AllocationPosition {
                amounts: Self::zero_amounts(env, config.stake_tokens.len()),
                reward_debts: Self::zero_shares(env, config.stake_tokens.len()),
                pending_rewards: Self::zero_amounts(env, config.stake_tokens.len()),
                joined_at: 0,
                nonce: 0,
            })
    }

    fn zero_amounts(env: &Env, count: u32) -> Vec<i128> {
        let mut amounts = Vec::new(env);
        for _ in 0..count {
            amounts.push_back(0i128);
        }
        amounts
    }

    fn zero_shares(env: &Env, count: u32) -> Vec<U256> {
        let mut shares = Vec::new(env);
        for _ in 0..count {
            shares.push_back(U256::from_u32(env, 0));
        }
        shares
    }

    fn weight_sum(config: &AllocationConfig) -> Result<i128, AllocationPoolError> {
        let mut sum = 0i128;
        for weight in config.token_weights.iter() {
            sum = sum
                .checked_add(weight)
                .ok_or(AllocationPoolError::Overflow)?;
        }
        Ok(sum)
    }

    fn position_weight(
        config: &AllocationConfig,
        position: &AllocationPosition,
    ) -> Result<i128, AllocationPoolError> {
        let mut weight = 0i128;
        for i in 0..config.token_weights.len() {
            let part = position
                .amounts
                .get_unchecked(i)
                .checked_mul(config.token_weights.get_unchecked(i))
                .ok_or(AllocationPoolError::Overflow)?;
            weight = weight
                .checked_add(part)
                .ok_or(AllocationPoolError::Overflow)?;
        }
        Ok(weight)
    }

    /// The pool-level accrual checkpoint. Emission between the last
    /// checkpoint and the current block is split across reward tokens by
    /// weight and folded into the accumulators; with nobody staked the
    /// checkpoint advances and that interval's emission is attributable to
    /// no one. Idempotent within a single block.
    fn update_accrual(
        env: &Env,
        config: &AllocationConfig,
        accrual: &mut GlobalAccrual,
    ) -> Result<(), AllocationPoolError> {
        let now_block = env.ledger().sequence();
        if now_block <= accrual.last_reward_block {
            return Ok(());
        }
        if accrual.total_staked_weight == 0 {
            accrual.last_reward_block = now_block;
            return Ok(());
        }

        let pot = SharedPot {
            rate_per_block: Self::rate_per_block(env.clone()),
            bonus_multiplier: config.bonus_multiplier,
            bonus_end_block: config.bonus_end_block as u64,
        };
        let emitted = pot
            .emitted(env, accrual.last_reward_block as u64, now_block as u64)
            .ok_or(AllocationPoolError::Overflow)?;
        let weight_sum = Self::weight_sum(config)?;

        for i in 0..config.reward_tokens.len() {
            let share = mul_div(env, emitted, config.token_weights.get_unchecked(i), weight_sum)
                .ok_or(AllocationPoolError::Overflow)?;
            let delta = acc_delta(env, share, accrual.total_staked_weight)
                .ok_or(AllocationPoolError::Overflow)?;
            let grown = accrual.acc_reward_per_share.get_unchecked(i).add(&delta);
            accrual.acc_reward_per_share.set(i, grown);
        }
        accrual.last_reward_block = now_block;

        Ok(())
    }

    /// Credit the position with everything the accumulator attributes to it
    /// since its last debt snapshot. Must run against a freshly updated
    /// accumulator and before any weight change.
    fn settle_position(
        env: &Env,
        config: &AllocationConfig,
        accrual: &GlobalAccrual,
        position: &mut AllocationPosition,
    ) -> Result<(), AllocationPoolError> {
        let weight = Self::position_weight(config, position)?;
        for i in 0..config.reward_tokens.len() {
            let acc = accrual.acc_reward_per_share.get_unchecked(i);
            let debt = position.reward_debts.get_unchecked(i);
            let earned =
                accrued_since(env, weight, &acc, &debt).ok_or(AllocationPoolError::Overflow)?;
            let pending = position
                .pending_rewards
                .get_unchecked(i)
                .checked_add(earned)
                .ok_or(AllocationPoolError::Overflow)?;
            position.pending_rewards.set(i, pending);
        }
        Ok(())
    }

    /// Re-snapshot reward debts at the position's current weight
    fn refresh_debts(
        env: &Env,
        config: &AllocationConfig,
        accrual: &GlobalAccrual,
        position: &mut AllocationPosition,
    ) -> Result<(), AllocationPoolError> {
        let weight = Self::position_weight(config, position)?;
        for i in 0..config.reward_tokens.len() {
            let acc = accrual.acc_reward_per_share.get_unchecked(i);
            let debt =
                settled_value(env, weight, &acc).ok_or(AllocationPoolError::Overflow)?;
            position.reward_debts.set(i, debt);
        }
        Ok(())
    }

    fn set_paused(env: Env, caller: Address, paused: bool) -> Result<(), AllocationPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        Self::require_operator(&env, &config, &caller)?;

        env.storage().instance().set(&DataKey::Paused, &paused);

        log!(&env, "Paused set to: {}", paused);

        Ok(())
    }

    fn require_operator(
        env: &Env,
        config: &AllocationConfig,
        caller: &Address,
    ) -> Result<(), AllocationPoolError> {
        let registry = PoolFactoryClient::new(env, &config.factory);
        if !registry.is_operator(caller) {
            return Err(AllocationPoolError::Forbidden);
        }
        Ok(())
    }

    fn require_admin(
        env: &Env,
        config: &AllocationConfig,
        caller: &Address,
    ) -> Result<(), AllocationPoolError> {
        let registry = PoolFactoryClient::new(env, &config.factory);
        if !registry.has_role(caller, &Role::Admin) {
            return Err(AllocationPoolError::Forbidden);
        }
        Ok(())
    }
}
