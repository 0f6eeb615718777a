use super::*;
use launchpool_factory::PoolFactory;
use launchpool_shared::SCALE;
use soroban_sdk::{
    testutils::{Address as _, Ledger},
    token::{Client as TokenClient, StellarAssetClient},
    vec, Env,
};

const START: u64 = 1_000;
const HOUR: u64 = 3_600;
const APR_10: i128 = 10 * SCALE;

struct LinearPoolTest {
    env: Env,
    admin: Address,
    factory_id: Address,
    factory: PoolFactoryClient<'static>,
    pool: LinearPoolClient<'static>,
    pool_id: Address,
    stake_token: Address,
    reward_token: Address,
    distributor: Address,
    user1: Address,
    user2: Address,
}

impl LinearPoolTest {
    fn setup() -> Self {
        let env = Env::default();
        env.mock_all_auths();
        env.ledger().with_mut(|li| {
            li.timestamp = START;
            li.sequence_number = 10;
        });

        let admin = Address::generate(&env);
        let distributor = Address::generate(&env);
        let user1 = Address::generate(&env);
        let user2 = Address::generate(&env);

        let factory_id = env.register_contract(None, PoolFactory);
        let factory = PoolFactoryClient::new(&env, &factory_id);
        factory.initialize(&admin);

        let issuer = Address::generate(&env);
        let stake_token = env.register_stellar_asset_contract(issuer.clone());
        let reward_token = env.register_stellar_asset_contract(issuer);
        StellarAssetClient::new(&env, &stake_token).mint(&user1, &(1_000 * SCALE));
        StellarAssetClient::new(&env, &stake_token).mint(&user2, &(1_000 * SCALE));
        StellarAssetClient::new(&env, &reward_token).mint(&distributor, &(10_000 * SCALE));

        let pool_id = env.register_contract(None, LinearPool);
        let pool = LinearPoolClient::new(&env, &pool_id);
        pool.initialize(
            &admin,
            &factory_id,
            &vec![&env, stake_token.clone()],
            &vec![&env, reward_token.clone()],
            &vec![&env, APR_10],
            &0,
            &0,
            &0,
            &START,
            &0,
            &HOUR,
            &Some(distributor.clone()),
        );
        TokenClient::new(&env, &reward_token).approve(
            &distributor,
            &pool_id,
            &(10_000 * SCALE),
            &10_000,
        );

        Self {
            env,
            admin,
            factory_id,
            factory,
            pool,
            pool_id,
            stake_token,
            reward_token,
            distributor,
            user1,
            user2,
        }
    }

    fn at(&self, timestamp: u64) {
        self.env.ledger().with_mut(|li| li.timestamp = timestamp);
    }

    fn register_pool(&self) -> (Address, LinearPoolClient<'static>) {
        let pool_id = self.env.register_contract(None, LinearPool);
        let client = LinearPoolClient::new(&self.env, &pool_id);
        (pool_id, client)
    }

    fn stake_balance(&self, who: &Address) -> i128 {
        TokenClient::new(&self.env, &self.stake_token).balance(who)
    }

    fn reward_balance(&self, who: &Address) -> i128 {
        TokenClient::new(&self.env, &self.reward_token).balance(who)
    }
}

#[test]
fn test_initialize() {
    let t = LinearPoolTest::setup();

    let config = t.pool.get_config();
    assert_eq!(config.factory, t.factory_id);
    assert_eq!(config.aprs, vec![&t.env, APR_10]);
    assert_eq!(config.lock_duration, HOUR);
    assert_eq!(config.reward_distributor, Some(t.distributor.clone()));
    assert_eq!(t.pool.pool_state(), PoolState::Active);
    assert!(t.factory.pools(&PoolKind::Linear).contains(&t.pool_id));

    let result = t.pool.try_initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &START,
        &0,
        &HOUR,
        &None,
    );
    assert_eq!(result, Err(Ok(LinearPoolError::AlreadyInitialized)));
}

#[test]
fn test_initialize_validation() {
    let t = LinearPoolTest::setup();
    let outsider = Address::generate(&t.env);

    // deployer must hold the factory admin role
    let (_, pool) = t.register_pool();
    let result = pool.try_initialize(
        &outsider,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &START,
        &0,
        &HOUR,
        &None,
    );
    assert_eq!(result, Err(Ok(LinearPoolError::Forbidden)));

    // reward list arity must match the stake list
    let result = pool.try_initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone(), t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &START,
        &0,
        &HOUR,
        &None,
    );
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidTokenLength)));

    // a stake asset may appear only once
    let result = pool.try_initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone(), t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone(), t.reward_token.clone()],
        &vec![&t.env, APR_10, APR_10],
        &0,
        &0,
        &0,
        &START,
        &0,
        &HOUR,
        &None,
    );
    assert_eq!(result, Err(Ok(LinearPoolError::DuplicateStakeToken)));

    // join window must end in the future and after it starts
    let result = pool.try_initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &START,
        &(START - 30),
        &HOUR,
        &None,
    );
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidJoinTime)));

    // degenerate investment bounds
    let result = pool.try_initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &(10 * SCALE),
        &SCALE,
        &START,
        &0,
        &HOUR,
        &None,
    );
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidInvestmentBounds)));
}

#[test]
fn test_deposit() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    t.pool.deposit(&t.user2, &vec![&t.env, 5 * SCALE]);

    assert_eq!(t.pool.balance_of(&t.user1), vec![&t.env, 5 * SCALE]);
    assert_eq!(t.pool.balance_of(&t.user2), vec![&t.env, 5 * SCALE]);
    assert_eq!(t.pool.total_staked(), vec![&t.env, 10 * SCALE]);
    assert_eq!(t.stake_balance(&t.user1), 995 * SCALE);

    // staking for another account credits the beneficiary, debits the payer
    t.pool
        .deposit_for(&t.user1, &t.user2, &vec![&t.env, 5 * SCALE]);
    assert_eq!(t.pool.balance_of(&t.user1), vec![&t.env, 5 * SCALE]);
    assert_eq!(t.pool.balance_of(&t.user2), vec![&t.env, 10 * SCALE]);
    assert_eq!(t.stake_balance(&t.user1), 990 * SCALE);
}

#[test]
fn test_deposit_reverts() {
    let t = LinearPoolTest::setup();

    // amount vector arity must match the configured token count
    let result = t
        .pool
        .try_deposit(&t.user1, &vec![&t.env, 5 * SCALE, SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidAmountLength)));

    // a pool with a future window rejects joins until it opens, and after
    // its end time
    let (_, future_pool) = t.register_pool();
    future_pool.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &(START + HOUR),
        &(START + 2 * HOUR),
        &HOUR,
        &Some(t.distributor.clone()),
    );
    let result = future_pool.try_deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::NotStarted)));

    t.at(START + 3 * HOUR);
    let result = future_pool.try_deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::AlreadyClosed)));

    // explicit close rejects joins too
    t.pool.set_pool_closed(&t.admin, &true);
    let result = t.pool.try_deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::AlreadyClosed)));
    t.pool.set_pool_closed(&t.admin, &false);

    t.pool.pause(&t.admin);
    let result = t.pool.try_deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::Paused)));
    t.pool.unpause(&t.admin);
}

#[test]
fn test_capacity_and_investment_bounds() {
    let t = LinearPoolTest::setup();

    let (_, bounded) = t.register_pool();
    bounded.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &(10 * SCALE),
        &SCALE,
        &(8 * SCALE),
        &START,
        &0,
        &0,
        &Some(t.distributor.clone()),
    );

    // below the per-position minimum
    let result = bounded.try_deposit(&t.user1, &vec![&t.env, SCALE / 2]);
    assert_eq!(result, Err(Ok(LinearPoolError::BelowMinInvestment)));

    bounded.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);

    // the position bound applies to the accumulated stake
    let result = bounded.try_deposit(&t.user1, &vec![&t.env, 4 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::AboveMaxInvestment)));

    // over-cap deposits are rejected outright, not partially filled
    bounded.deposit(&t.user2, &vec![&t.env, 4 * SCALE]);
    let result = bounded.try_deposit(&t.user2, &vec![&t.env, 2 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::PoolFull)));

    // filling exactly to the cap is allowed
    bounded.deposit(&t.user2, &vec![&t.env, SCALE]);
    assert_eq!(bounded.total_staked(), vec![&t.env, 10 * SCALE]);
}

#[test]
fn test_withdraw_pays_rewards() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    t.pool.deposit(&t.user2, &vec![&t.env, 5 * SCALE]);

    // two hours at 10%/yr on 5e18
    t.at(START + 2 * HOUR);
    t.pool.withdraw(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(t.pool.balance_of(&t.user1), vec![&t.env, 0]);
    assert_eq!(t.reward_balance(&t.user1), 114_155_251_141_552);
    assert_eq!(t.stake_balance(&t.user1), 1_000 * SCALE);

    // five hours at 10%/yr on 5e18; partial principal withdrawal
    t.at(START + 5 * HOUR);
    t.pool.withdraw(&t.user2, &vec![&t.env, 4 * SCALE]);
    assert_eq!(t.pool.balance_of(&t.user2), vec![&t.env, SCALE]);
    assert_eq!(t.reward_balance(&t.user2), 285_388_127_853_881);
}

#[test]
fn test_withdraw_reverts() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);

    // 30 seconds into a one-hour lock
    t.at(START + 30);
    let result = t.pool.try_withdraw(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::StillLocked)));

    // an account with nothing staked
    t.at(START + 2 * HOUR);
    let result = t.pool.try_withdraw(&t.user2, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::NothingToWithdraw)));

    // a pool with no distributor cannot pay the reward leg
    let (_, orphan) = t.register_pool();
    orphan.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &START,
        &0,
        &0,
        &None,
    );
    orphan.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    let result = orphan.try_withdraw(&t.user1, &vec![&t.env, 5 * SCALE]);
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidDistributor)));
}

#[test]
fn test_claim_rewards() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    t.pool.deposit(&t.user2, &vec![&t.env, 5 * SCALE]);

    t.at(START + 2 * HOUR);
    t.pool.claim_reward(&t.user1);
    assert_eq!(t.pool.balance_of(&t.user1), vec![&t.env, 5 * SCALE]);
    assert_eq!(t.reward_balance(&t.user1), 114_155_251_141_552);

    // topping up settles the carried reward, then accrues on 15e18
    t.pool.deposit(&t.user2, &vec![&t.env, 10 * SCALE]);
    assert_eq!(t.pool.balance_of(&t.user2), vec![&t.env, 15 * SCALE]);

    t.at(START + 2 * HOUR + 3_602);
    t.pool.claim_reward(&t.user2);
    assert_eq!(t.reward_balance(&t.user2), 285_483_257_229_832);
}

#[test]
fn test_close_freezes_accrual() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 15 * SCALE]);

    t.at(START + 2 * HOUR);
    t.pool.claim_reward(&t.user1);
    let after_first_claim = t.reward_balance(&t.user1);

    // close one hour later; a claim two hours after that only pays up to
    // the closing time
    t.at(START + 3 * HOUR);
    t.pool.set_pool_closed(&t.admin, &true);
    assert_eq!(t.pool.pool_state(), PoolState::Closed);

    t.at(START + 5 * HOUR);
    t.pool.claim_reward(&t.user1);
    assert_eq!(
        t.reward_balance(&t.user1) - after_first_claim,
        171_232_876_712_328
    );
    assert_eq!(t.pool.pending_reward(&t.user1), vec![&t.env, 0]);

    t.pool.set_pool_closed(&t.admin, &false);
    assert_eq!(t.pool.pool_state(), PoolState::Active);
}

#[test]
fn test_claim_reverts() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);

    let result = t.pool.try_claim_reward(&t.user1);
    assert_eq!(result, Err(Ok(LinearPoolError::StillLocked)));

    t.at(START + 2 * HOUR);
    let result = t.pool.try_claim_reward(&t.user2);
    assert_eq!(result, Err(Ok(LinearPoolError::NothingStaked)));

    let (_, orphan) = t.register_pool();
    orphan.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &START,
        &0,
        &0,
        &None,
    );
    orphan.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);
    t.at(START + 3 * HOUR);
    let result = orphan.try_claim_reward(&t.user1);
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidDistributor)));
}

#[test]
fn test_emergency_withdraw() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);

    let result = t.pool.try_emergency_withdraw(&t.user1);
    assert_eq!(result, Err(Ok(LinearPoolError::EmergencyNotAllowed)));

    t.pool.set_allow_emergency_withdraw(&t.admin, &true);

    // principal returns in full, pending reward is forfeited
    t.at(START + 2 * HOUR);
    t.pool.emergency_withdraw(&t.user1);
    assert_eq!(t.pool.balance_of(&t.user1), vec![&t.env, 0]);
    assert_eq!(t.stake_balance(&t.user1), 1_000 * SCALE);
    assert_eq!(t.reward_balance(&t.user1), 0);
    assert_eq!(t.pool.pending_reward(&t.user1), vec![&t.env, 0]);
    assert_eq!(t.pool.total_staked(), vec![&t.env, 0]);
}

#[test]
fn test_admin_gating() {
    let t = LinearPoolTest::setup();
    let moderator = Address::generate(&t.env);

    let result = t
        .pool
        .try_set_reward_distributor(&t.user1, &Some(t.user2.clone()));
    assert_eq!(result, Err(Ok(LinearPoolError::Forbidden)));
    let result = t.pool.try_pause(&t.user1);
    assert_eq!(result, Err(Ok(LinearPoolError::Forbidden)));

    // mods may operate the pool
    t.factory.grant_role(&t.admin, &moderator, &Role::Mod);
    t.pool.pause(&moderator);
    t.pool.unpause(&moderator);
    t.pool
        .set_reward_distributor(&moderator, &Some(t.user2.clone()));
    assert_eq!(
        t.pool.get_config().reward_distributor,
        Some(t.user2.clone())
    );

    // but not change admin-only settings
    let result = t.pool.try_set_max_reward_token_count(&moderator, &4);
    assert_eq!(result, Err(Ok(LinearPoolError::Forbidden)));
    let result = t.pool.try_set_allow_emergency_withdraw(&moderator, &true);
    assert_eq!(result, Err(Ok(LinearPoolError::Forbidden)));

    let result = t.pool.try_set_max_reward_token_count(&t.admin, &6);
    assert_eq!(result, Err(Ok(LinearPoolError::InvalidRewardTokenCount)));
    t.pool.set_max_reward_token_count(&t.admin, &4);
    assert_eq!(t.pool.get_config().max_reward_token_count, 4);
}

#[test]
fn test_recover_fund() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);

    // tokens stranded in the contract can be swept out
    StellarAssetClient::new(&t.env, &t.reward_token).mint(&t.pool_id, &(10 * SCALE));
    t.pool
        .recover_fund(&t.admin, &t.reward_token, &t.admin, &(5 * SCALE));
    assert_eq!(t.reward_balance(&t.admin), 5 * SCALE);

    // active stake collateral cannot be drained
    let result = t
        .pool
        .try_recover_fund(&t.admin, &t.stake_token, &t.admin, &SCALE);
    assert_eq!(result, Err(Ok(LinearPoolError::RecoverStakedToken)));

    t.at(START + 2 * HOUR);
    t.pool.withdraw(&t.user1, &vec![&t.env, 5 * SCALE]);

    // once nothing is staked the asset is no longer collateral
    StellarAssetClient::new(&t.env, &t.stake_token).mint(&t.pool_id, &SCALE);
    t.pool
        .recover_fund(&t.admin, &t.stake_token, &t.admin, &SCALE);
}

#[test]
fn test_pending_projection_is_settle_neutral() {
    let t = LinearPoolTest::setup();

    t.pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE]);

    t.at(START + 2 * HOUR);
    let first = t.pool.pending_reward(&t.user1);
    let second = t.pool.pending_reward(&t.user1);
    assert_eq!(first, second);
    assert_eq!(first, vec![&t.env, 114_155_251_141_552]);

    // settling pays exactly the projection and leaves nothing behind
    t.pool.claim_reward(&t.user1);
    assert_eq!(t.reward_balance(&t.user1), first.get_unchecked(0));
    assert_eq!(t.pool.pending_reward(&t.user1), vec![&t.env, 0]);
}

#[test]
fn test_multi_pair_accrual_is_independent() {
    let t = LinearPoolTest::setup();

    let issuer = Address::generate(&t.env);
    let stake_b = t.env.register_stellar_asset_contract(issuer.clone());
    let reward_b = t.env.register_stellar_asset_contract(issuer);
    StellarAssetClient::new(&t.env, &stake_b).mint(&t.user1, &(1_000 * SCALE));
    StellarAssetClient::new(&t.env, &reward_b).mint(&t.distributor, &(10_000 * SCALE));

    let (pool_id, pool) = t.register_pool();
    pool.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone(), stake_b.clone()],
        &vec![&t.env, t.reward_token.clone(), reward_b.clone()],
        &vec![&t.env, APR_10, 20 * SCALE],
        &0,
        &0,
        &0,
        &START,
        &0,
        &0,
        &Some(t.distributor.clone()),
    );
    TokenClient::new(&t.env, &t.reward_token).approve(
        &t.distributor,
        &pool_id,
        &(10_000 * SCALE),
        &10_000,
    );
    TokenClient::new(&t.env, &reward_b).approve(
        &t.distributor,
        &pool_id,
        &(10_000 * SCALE),
        &10_000,
    );

    pool.deposit(&t.user1, &vec![&t.env, 5 * SCALE, 2 * SCALE]);

    t.at(START + HOUR);
    assert_eq!(
        pool.pending_reward(&t.user1),
        vec![&t.env, 57_077_625_570_776, 45_662_100_456_621]
    );

    pool.claim_reward(&t.user1);
    assert_eq!(t.reward_balance(&t.user1), 57_077_625_570_776);
    assert_eq!(
        TokenClient::new(&t.env, &reward_b).balance(&t.user1),
        45_662_100_456_621
    );
}

#[test]
fn test_principal_conservation_without_rewards() {
    let t = LinearPoolTest::setup();

    let (_, pool) = t.register_pool();
    pool.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, 0],
        &0,
        &0,
        &0,
        &START,
        &0,
        &0,
        &Some(t.distributor.clone()),
    );

    pool.deposit(&t.user1, &vec![&t.env, 7 * SCALE]);
    pool.deposit(&t.user1, &vec![&t.env, 3 * SCALE]);

    t.at(START + 10 * HOUR);
    pool.withdraw(&t.user1, &vec![&t.env, 4 * SCALE]);
    pool.withdraw(&t.user1, &vec![&t.env, 6 * SCALE]);

    assert_eq!(t.stake_balance(&t.user1), 1_000 * SCALE);
    assert_eq!(t.reward_balance(&t.user1), 0);
    assert_eq!(pool.total_staked(), vec![&t.env, 0]);
}

#[test]
fn test_pool_state_transitions() {
    let t = LinearPoolTest::setup();

    let (_, pool) = t.register_pool();
    pool.initialize(
        &t.admin,
        &t.factory_id,
        &vec![&t.env, t.stake_token.clone()],
        &vec![&t.env, t.reward_token.clone()],
        &vec![&t.env, APR_10],
        &0,
        &0,
        &0,
        &(START + HOUR),
        &(START + 2 * HOUR),
        &0,
        &None,
    );

    assert_eq!(pool.pool_state(), PoolState::NotStarted);
    t.at(START + HOUR);
    assert_eq!(pool.pool_state(), PoolState::Active);
    t.at(START + 2 * HOUR + 1);
    assert_eq!(pool.pool_state(), PoolState::Closed);
}
