#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, vec, Address,
    Env, Vec,
};

use launchpool_factory::PoolFactoryClient;
use launchpool_shared::{
    contains_duplicate, valid_amount, valid_investment_bounds, valid_join_window, AccrualSchedule,
    FixedRate, PoolKind, PoolState, Role, MAX_REWARD_TOKENS,
};

// Data Types

/// Immutable pairing of stake and reward assets with per-pair APRs, plus the
/// admin-adjustable payout settings. APRs are yearly percentages carrying 18
/// decimals (10e18 = 10% a year), each pair accruing independently.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinearConfig {
    pub factory: Address,
    pub stake_tokens: Vec<Address>,
    pub reward_tokens: Vec<Address>,
    pub aprs: Vec<i128>,
    /// total normalized stake the pool accepts; 0 = unbounded
    pub cap: i128,
    /// per-position bounds on the normalized staked value; 0 = unset
    pub min_investment: i128,
    pub max_investment: i128,
    pub start_join_time: u64,
    /// 0 = open-ended
    pub end_join_time: u64,
    pub lock_duration: u64,
    /// rewards are paid out of this account's balance; None makes the
    /// claim and withdraw paths inoperative
    pub reward_distributor: Option<Address>,
    pub max_reward_token_count: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinearPoolStatus {
    pub paused: bool,
    pub closed: bool,
    /// accrual horizon while the pool is closed
    pub closed_at: u64,
    pub allow_emergency_withdraw: bool,
}

/// One position per depositor, created zero-valued on first touch and never
/// deleted. `joined_at` anchors the lock, `updated_at` the accrual
/// checkpoint; the two diverge because claims settle without re-locking.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinearPosition {
    pub balances: Vec<i128>,
    pub pending_rewards: Vec<i128>,
    pub joined_at: u64,
    pub updated_at: u64,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    Status,
    TotalStaked,
    Position(Address),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LinearPoolError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Forbidden = 3,
    InvalidTokenLength = 4,
    DuplicateStakeToken = 5,
    InvalidJoinTime = 6,
    InvalidInvestmentBounds = 7,
    InvalidRate = 8,
    InvalidAmountLength = 9,
    InvalidAmount = 10,
    NotStarted = 11,
    AlreadyClosed = 12,
    PoolFull = 13,
    BelowMinInvestment = 14,
    AboveMaxInvestment = 15,
    StillLocked = 16,
    NothingToWithdraw = 17,
    NothingStaked = 18,
    InvalidDistributor = 19,
    EmergencyNotAllowed = 20,
    RecoverStakedToken = 21,
    Paused = 22,
    InvalidRewardTokenCount = 23,
    Overflow = 24,
}

// Events

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositEvent {
    pub depositor: Address,
    pub beneficiary: Address,
    pub amounts: Vec<i128>,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawEvent {
    pub user: Address,
    pub amounts: Vec<i128>,
    pub rewards: Vec<i128>,
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

#[contract]
pub struct LinearPool;

#[contractimpl]
impl LinearPool {
    /// Initialize the pool and register it with the factory. The deployer
    /// must hold the factory admin role; configuration is validated as a
    /// whole and creation fails atomically.
    pub fn initialize(
        env: Env,
        deployer: Address,
        factory: Address,
        stake_tokens: Vec<Address>,
        reward_tokens: Vec<Address>,
        aprs: Vec<i128>,
        cap: i128,
        min_investment: i128,
        max_investment: i128,
        start_join_time: u64,
        end_join_time: u64,
        lock_duration: u64,
        reward_distributor: Option<Address>,
    ) -> Result<(), LinearPoolError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(LinearPoolError::AlreadyInitialized);
        }

        deployer.require_auth();

        let registry = PoolFactoryClient::new(&env, &factory);
        if !registry.has_role(&deployer, &Role::Admin) {
            return Err(LinearPoolError::Forbidden);
        }

        let count = stake_tokens.len();
        if count == 0 || count > MAX_REWARD_TOKENS || reward_tokens.len() != count {
            return Err(LinearPoolError::InvalidTokenLength);
        }
        if aprs.len() != count {
            return Err(LinearPoolError::InvalidTokenLength);
        }
        if contains_duplicate(&stake_tokens) {
            return Err(LinearPoolError::DuplicateStakeToken);
        }
        for apr in aprs.iter() {
            if apr < 0 {
                return Err(LinearPoolError::InvalidRate);
            }
        }
        if cap < 0 {
            return Err(LinearPoolError::InvalidAmount);
        }
        if !valid_join_window(env.ledger().timestamp(), start_join_time, end_join_time) {
            return Err(LinearPoolError::InvalidJoinTime);
        }
        if !valid_investment_bounds(min_investment, max_investment) {
            return Err(LinearPoolError::InvalidInvestmentBounds);
        }

        let config = LinearConfig {
            factory: factory.clone(),
            stake_tokens,
            reward_tokens,
            aprs,
            cap,
            min_investment,
            max_investment,
            start_join_time,
            end_join_time,
            lock_duration,
            reward_distributor,
            max_reward_token_count: count,
        };
        let status = LinearPoolStatus {
            paused: false,
            closed: false,
            closed_at: 0,
            allow_emergency_withdraw: false,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::Status, &status);
        env.storage()
            .instance()
            .set(&DataKey::TotalStaked, &Self::zero_amounts(&env, count));

        registry.register_pool(&env.current_contract_address(), &PoolKind::Linear);

        log!(&env, "Linear pool initialized by {}", deployer);

        Ok(())
    }

    /// Stake into the caller's own position
    pub fn deposit(
        env: Env,
        depositor: Address,
        amounts: Vec<i128>,
    ) -> Result<(), LinearPoolError> {
        Self::deposit_for(env, depositor.clone(), depositor, amounts)
    }

    /// Stake on behalf of another position. Funds leave the depositor, the
    /// beneficiary owns the resulting stake and rewards.
    pub fn deposit_for(
        env: Env,
        depositor: Address,
        beneficiary: Address,
        amounts: Vec<i128>,
    ) -> Result<(), LinearPoolError> {
        depositor.require_auth();

        let config = Self::config(&env)?;
        let status = Self::status(&env);
        if status.paused {
            return Err(LinearPoolError::Paused);
        }

        let now = env.ledger().timestamp();
        if now < config.start_join_time {
            return Err(LinearPoolError::NotStarted);
        }
        if status.closed || (config.end_join_time != 0 && now > config.end_join_time) {
            return Err(LinearPoolError::AlreadyClosed);
        }
        if amounts.len() != config.stake_tokens.len() {
            return Err(LinearPoolError::InvalidAmountLength);
        }
        for amount in amounts.iter() {
            if !valid_amount(amount) {
                return Err(LinearPoolError::InvalidAmount);
            }
        }

        let mut position = Self::position(&env, &beneficiary, &config);
        Self::settle(&env, &config, &status, &mut position, now)?;

        let mut totals = Self::total_staked(env.clone());
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            let balance = position
                .balances
                .get_unchecked(i)
                .checked_add(amount)
                .ok_or(LinearPoolError::Overflow)?;
            position.balances.set(i, balance);
            let total = totals
                .get_unchecked(i)
                .checked_add(amount)
                .ok_or(LinearPoolError::Overflow)?;
            totals.set(i, total);
        }

        let staked_value = Self::normalized_value(&position.balances)?;
        if config.min_investment > 0 && staked_value < config.min_investment {
            return Err(LinearPoolError::BelowMinInvestment);
        }
        if config.max_investment > 0 && staked_value > config.max_investment {
            return Err(LinearPoolError::AboveMaxInvestment);
        }
        if config.cap > 0 && Self::normalized_value(&totals)? > config.cap {
            return Err(LinearPoolError::PoolFull);
        }

        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if amount > 0 {
                token::Client::new(&env, &config.stake_tokens.get_unchecked(i)).transfer(
                    &depositor,
                    &env.current_contract_address(),
                    &amount,
                );
            }
        }

        position.joined_at = now;
        env.storage()
            .persistent()
            .set(&DataKey::Position(beneficiary.clone()), &position);
        env.storage().instance().set(&DataKey::TotalStaked, &totals);

        let event = DepositEvent {
            depositor,
            beneficiary,
            amounts,
            timestamp: now,
        };
        env.events().publish((symbol_short!("deposit"),), event);

        Ok(())
    }

    /// Withdraw staked principal; settles first and pays out every pending
    /// reward through the distributor
    pub fn withdraw(
        env: Env,
        caller: Address,
        amounts: Vec<i128>,
    ) -> Result<(), LinearPoolError> {
        caller.require_auth();

        let config = Self::config(&env)?;
        let status = Self::status(&env);
        if status.paused {
            return Err(LinearPoolError::Paused);
        }
        if amounts.len() != config.stake_tokens.len() {
            return Err(LinearPoolError::InvalidAmountLength);
        }

        let now = env.ledger().timestamp();
        if now < config.start_join_time {
            return Err(LinearPoolError::NotStarted);
        }

        let mut position = Self::position(&env, &caller, &config);
        if now < position.joined_at + config.lock_duration {
            return Err(LinearPoolError::StillLocked);
        }
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if !valid_amount(amount) {
                return Err(LinearPoolError::InvalidAmount);
            }
            if amount > position.balances.get_unchecked(i) {
                return Err(LinearPoolError::NothingToWithdraw);
            }
        }
        let distributor = config
            .reward_distributor
            .clone()
            .ok_or(LinearPoolError::InvalidDistributor)?;

        Self::settle(&env, &config, &status, &mut position, now)?;
        let rewards = Self::pay_rewards(&env, &config, &distributor, &caller, &mut position);

        let mut totals = Self::total_staked(env.clone());
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if amount > 0 {
                position
                    .balances
                    .set(i, position.balances.get_unchecked(i) - amount);
                totals.set(i, totals.get_unchecked(i) - amount);
                token::Client::new(&env, &config.stake_tokens.get_unchecked(i)).transfer(
                    &env.current_contract_address(),
                    &caller,
                    &amount,
                );
            }
        }

        env.storage()
            .persistent()
            .set(&DataKey::Position(caller.clone()), &position);
        env.storage().instance().set(&DataKey::TotalStaked, &totals);

        let event = WithdrawEvent {
            user: caller,
            amounts,
            rewards,
            timestamp: now,
        };
        env.events().publish((symbol_short!("withdraw"),), event);

        Ok(())
    }

    /// Pay out pending rewards without touching staked principal
    pub fn claim_reward(env: Env, caller: Address) -> Result<(), LinearPoolError> {
        caller.require_auth();

        let config = Self::config(&env)?;
        let status = Self::status(&env);
        if status.paused {
            return Err(LinearPoolError::Paused);
        }

        let now = env.ledger().timestamp();
        let mut position = Self::position(&env, &caller, &config);
        if Self::normalized_value(&position.balances)? == 0 {
            return Err(LinearPoolError::NothingStaked);
        }
        if now < position.joined_at + config.lock_duration {
            return Err(LinearPoolError::StillLocked);
        }
        let distributor = config
            .reward_distributor
            .clone()
            .ok_or(LinearPoolError::InvalidDistributor)?;

        Self::settle(&env, &config, &status, &mut position, now)?;
        let rewards = Self::pay_rewards(&env, &config, &distributor, &caller, &mut position);

        env.storage()
            .persistent()
            .set(&DataKey::Position(caller.clone()), &position);

        let event = ClaimEvent {
            user: caller,
            rewards,
            timestamp: now,
        };
        env.events().publish((symbol_short!("claim"),), event);

        Ok(())
    }

    /// Return the full principal and forfeit pending rewards. Only available
    /// once an admin has switched the escape hatch on.
    pub fn emergency_withdraw(env: Env, caller: Address) -> Result<(), LinearPoolError> {
        caller.require_auth();

        let config = Self::config(&env)?;
        let status = Self::status(&env);
        if !status.allow_emergency_withdraw {
            return Err(LinearPoolError::EmergencyNotAllowed);
        }

        let now = env.ledger().timestamp();
        let mut position = Self::position(&env, &caller, &config);
        let amounts = position.balances.clone();

        let mut totals = Self::total_staked(env.clone());
        for i in 0..amounts.len() {
            let amount = amounts.get_unchecked(i);
            if amount > 0 {
                totals.set(i, totals.get_unchecked(i) - amount);
                token::Client::new(&env, &config.stake_tokens.get_unchecked(i)).transfer(
                    &env.current_contract_address(),
                    &caller,
                    &amount,
                );
            }
            position.balances.set(i, 0);
            position.pending_rewards.set(i, 0);
        }
        position.updated_at = now;

        env.storage()
            .persistent()
            .set(&DataKey::Position(caller.clone()), &position);
        env.storage().instance().set(&DataKey::TotalStaked, &totals);

        let event = EmergencyWithdrawEvent {
            user: caller,
            amounts,
            timestamp: now,
        };
        env.events().publish((symbol_short!("emergency"),), event);

        Ok(())
    }

    // Admin functions; roles live in the factory

    pub fn set_reward_distributor(
        env: Env,
        caller: Address,
        distributor: Option<Address>,
    ) -> Result<(), LinearPoolError> {
        caller.require_auth();
        let mut config = Self::config(&env)?;
        Self::require_operator(&env, &config, &caller)?;

        config.reward_distributor = distributor;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    /// Close or reopen the pool. Closing freezes reward accrual at the
    /// closing time; settlements performed while closed clamp there.
    pub fn set_pool_closed(env: Env, caller: Address, closed: bool) -> Result<(), LinearPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        Self::require_operator(&env, &config, &caller)?;

        let mut status = Self::status(&env);
        status.closed = closed;
        if closed {
            status.closed_at = env.ledger().timestamp();
        }
        env.storage().instance().set(&DataKey::Status, &status);

        log!(&env, "Pool closed set to: {}", closed);

        Ok(())
    }

    pub fn set_allow_emergency_withdraw(
        env: Env,
        caller: Address,
        allow: bool,
    ) -> Result<(), LinearPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        Self::require_admin(&env, &config, &caller)?;

        let mut status = Self::status(&env);
        status.allow_emergency_withdraw = allow;
        env.storage().instance().set(&DataKey::Status, &status);

        Ok(())
    }

    /// Raise the reward-token budget for operational tooling. The new bound
    /// must cover the configured pairs and stay within the hard cap.
    pub fn set_max_reward_token_count(
        env: Env,
        caller: Address,
        count: u32,
    ) -> Result<(), LinearPoolError> {
        caller.require_auth();
        let mut config = Self::config(&env)?;
        Self::require_admin(&env, &config, &caller)?;

        if count < config.reward_tokens.len() || count > MAX_REWARD_TOKENS {
            return Err(LinearPoolError::InvalidRewardTokenCount);
        }
        config.max_reward_token_count = count;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    /// Send stranded tokens out of the contract. Stake collateral cannot be
    /// drained while any of it is still owed to depositors.
    pub fn recover_fund(
        env: Env,
        caller: Address,
        asset: Address,
        to: Address,
        amount: i128,
    ) -> Result<(), LinearPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        Self::require_admin(&env, &config, &caller)?;
        if amount <= 0 {
            return Err(LinearPoolError::InvalidAmount);
        }

        let totals = Self::total_staked(env.clone());
        for i in 0..config.stake_tokens.len() {
            if config.stake_tokens.get_unchecked(i) == asset && totals.get_unchecked(i) > 0 {
                return Err(LinearPoolError::RecoverStakedToken);
            }
        }

        token::Client::new(&env, &asset).transfer(&env.current_contract_address(), &to, &amount);

        log!(&env, "Recovered {} of {} to {}", amount, asset, to);

        Ok(())
    }

    pub fn pause(env: Env, caller: Address) -> Result<(), LinearPoolError> {
        Self::set_paused(env, caller, true)
    }

    pub fn unpause(env: Env, caller: Address) -> Result<(), LinearPoolError> {
        Self::set_paused(env, caller, false)
    }

    // Getter functions

    pub fn balance_of(env: Env, user: Address) -> Vec<i128> {
        match Self::config(&env) {
            Ok(config) => Self::position(&env, &user, &config).balances,
            Err(_) => vec![&env],
        }
    }

    /// Projection of what a settlement at the current instant would credit;
    /// bit-identical to the mutating path
    pub fn pending_reward(env: Env, user: Address) -> Result<Vec<i128>, LinearPoolError> {
        let config = Self::config(&env)?;
        let status = Self::status(&env);
        let mut position = Self::position(&env, &user, &config);
        Self::settle(&env, &config, &status, &mut position, env.ledger().timestamp())?;
        Ok(position.pending_rewards)
    }

    pub fn total_staked(env: Env) -> Vec<i128> {
        env.storage()
            .instance()
            .get(&DataKey::TotalStaked)
            .unwrap_or(vec![&env])
    }

    pub fn pool_state(env: Env) -> Result<PoolState, LinearPoolError> {
        let config = Self::config(&env)?;
        let status = Self::status(&env);
        let now = env.ledger().timestamp();
        if now < config.start_join_time {
            return Ok(PoolState::NotStarted);
        }
        if status.closed || (config.end_join_time != 0 && now > config.end_join_time) {
            return Ok(PoolState::Closed);
        }
        Ok(PoolState::Active)
    }

    pub fn get_config(env: Env) -> Result<LinearConfig, LinearPoolError> {
        Self::config(&env)
    }

    pub fn get_status(env: Env) -> LinearPoolStatus {
        Self::status(&env)
    }

    // Internal helper functions

    fn config(env: &Env) -> Result<LinearConfig, LinearPoolError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(LinearPoolError::NotInitialized)
    }

    fn status(env: &Env) -> LinearPoolStatus {
        env.storage()
            .instance()
            .get(&DataKey::Status)
            .unwrap_or(LinearPoolStatus {
                paused: false,
                closed: false,
                closed_at: 0,
                allow_emergency_withdraw: false,
            })
    }

    fn position(env: &Env, user: &Address, config: &LinearConfig) -> LinearPosition {
        env.storage()
            .persistent()
            .get(&DataKey::Position(user.clone()))
            .unwrap_or(LinearPosition {
                balances: Self::zero_amounts(env, config.stake_tokens.len()),
                pending_rewards: Self::zero_amounts(env, config.stake_tokens.len()),
                joined_at: 0,
                updated_at: 0,
            })
    }

    fn zero_amounts(env: &Env, count: u32) -> Vec<i128> {
        let mut amounts = Vec::new(env);
        for _ in 0..count {
            amounts.push_back(0i128);
        }
        amounts
    }

    fn normalized_value(amounts: &Vec<i128>) -> Result<i128, LinearPoolError> {
        let mut value = 0i128;
        for amount in amounts.iter() {
            value = value.checked_add(amount).ok_or(LinearPoolError::Overflow)?;
        }
        Ok(value)
    }

    /// Fold elapsed time into the position before any balance change. Each
    /// pair accrues independently from the position's checkpoint, clamped at
    /// the closing time while the pool is closed. Idempotent at equal `now`.
    fn settle(
        env: &Env,
        config: &LinearConfig,
        status: &LinearPoolStatus,
        position: &mut LinearPosition,
        now: u64,
    ) -> Result<(), LinearPoolError> {
        let horizon = if status.closed && status.closed_at < now {
            status.closed_at
        } else {
            now
        };

        for i in 0..config.stake_tokens.len() {
            let schedule = FixedRate {
                principal: position.balances.get_unchecked(i),
                apr: config.aprs.get_unchecked(i),
            };
            let earned = schedule
                .emitted(env, position.updated_at, horizon)
                .ok_or(LinearPoolError::Overflow)?;
            let pending = position
                .pending_rewards
                .get_unchecked(i)
                .checked_add(earned)
                .ok_or(LinearPoolError::Overflow)?;
            position.pending_rewards.set(i, pending);
        }
        position.updated_at = now;

        Ok(())
    }

    /// Drain the settled pending amounts through the distributor's balance.
    /// A short distributor balance or allowance aborts the whole call.
    fn pay_rewards(
        env: &Env,
        config: &LinearConfig,
        distributor: &Address,
        to: &Address,
        position: &mut LinearPosition,
    ) -> Vec<i128> {
        let paid = position.pending_rewards.clone();
        for i in 0..config.reward_tokens.len() {
            let amount = paid.get_unchecked(i);
            if amount > 0 {
                token::Client::new(env, &config.reward_tokens.get_unchecked(i)).transfer_from(
                    &env.current_contract_address(),
                    distributor,
                    to,
                    &amount,
                );
            }
            position.pending_rewards.set(i, 0);
        }
        paid
    }

    fn set_paused(env: Env, caller: Address, paused: bool) -> Result<(), LinearPoolError> {
        caller.require_auth();
        let config = Self::config(&env)?;
        Self::require_operator(&env, &config, &caller)?;

        let mut status = Self::status(&env);
        status.paused = paused;
        env.storage().instance().set(&DataKey::Status, &status);

        Ok(())
    }

    fn require_operator(
        env: &Env,
        config: &LinearConfig,
        caller: &Address,
    ) -> Result<(), LinearPoolError> {
        let registry = PoolFactoryClient::new(env, &config.factory);
        if !registry.is_operator(caller) {
            return Err(LinearPoolError::Forbidden);
        }
        Ok(())
    }

    fn require_admin(
        env: &Env,
        config: &LinearConfig,
        caller: &Address,
    ) -> Result<(), LinearPoolError> {
        let registry = PoolFactoryClient::new(env, &config.factory);
        if !registry.has_role(caller, &Role::Admin) {
            return Err(LinearPoolError::Forbidden);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test;
