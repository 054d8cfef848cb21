//! Solace - Profit Engine (Soroban)
//! Tiered, participation-gated profit sharing fed by finalized revenue reports.

#![no_std]
use soroban_sdk::{contract, contractimpl, contracttype, symbol_short, token, Address, Env, Vec};
use solace_common::{
    admin, period, BPS_DENOMINATOR, INSTANCE_BUMP_AMOUNT, INSTANCE_LIFETIME_THRESHOLD,
    PERSISTENT_BUMP_AMOUNT, PERSISTENT_LIFETIME_THRESHOLD,
};

pub use solace_common::EngineError;

pub const TIER_COUNT: u32 = 4;
pub const TOP_TIER: u32 = TIER_COUNT - 1;
pub const AGENCY_FEE_BPS: i128 = 1_000; // 10%

// ============================================================
// Data Types
// ============================================================

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TierConfig {
    pub min_stake: i128,
    pub profit_share_bps: u32,
    pub fee_waiver_bps: u32,
    pub min_participation: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakePosition {
    pub amount: i128,
    pub tier: u32,
    pub participation: u32,
    /// First settled period this position has not been paid for.
    pub next_claim_period: u32,
    /// Profit owed under a previous tier, banked when the position moved up.
    pub accrued: i128,
    pub staked_at: u64,
}

/// Frozen outcome of one period. Tier totals are copied in, never referenced.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettlementRecord {
    pub period: u32,
    pub revenue: i128,
    pub expenses: i128,
    pub net_profit: i128,
    pub agency_fee: i128,
    pub distributable: i128,
    pub tier_snapshot: Vec<i128>,
    pub tier_distributed: Vec<i128>,
    pub undistributed: i128,
    pub settled_at: u64,
}

// ============================================================
// Storage Keys
// ============================================================

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Admin,
    PendingAdmin,
    Token,
    RevenueLedger,
    Compliance,
    ActivityOracle,
    TierConfig(u32),
    TierTotals,
    NextPeriod,
    LatestSettled,
    ProfitReserve,
    Settlement(u32),
    Positions(Address),
    Participation(Address),
    Unpaid(Address),
}

fn default_tiers() -> [TierConfig; TIER_COUNT as usize] {
    [
        TierConfig {
            min_stake: 1_000,
            profit_share_bps: 2_000,
            fee_waiver_bps: 1_000,
            min_participation: 0,
        },
        TierConfig {
            min_stake: 10_000,
            profit_share_bps: 2_500,
            fee_waiver_bps: 2_500,
            min_participation: 10,
        },
        TierConfig {
            min_stake: 50_000,
            profit_share_bps: 2_500,
            fee_waiver_bps: 5_000,
            min_participation: 25,
        },
        TierConfig {
            min_stake: 100_000,
            profit_share_bps: 3_000,
            fee_waiver_bps: 10_000,
            min_participation: 50,
        },
    ]
}

fn mul_div(value: i128, numerator: i128, denominator: i128) -> Result<i128, EngineError> {
    if denominator == 0 {
        return Ok(0);
    }
    value
        .checked_mul(numerator)
        .map(|product| product / denominator)
        .ok_or(EngineError::Overflow)
}

// ============================================================
// Contract
// ============================================================

#[contract]
pub struct ProfitEngineContract;

#[contractimpl]
impl ProfitEngineContract {
    pub fn initialize(
        env: Env,
        admin: Address,
        token: Address,
        revenue_ledger: Address,
        compliance: Address,
        activity_oracle: Address,
        first_period: u32,
    ) -> Result<(), EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(EngineError::AlreadyInitialized);
        }
        admin.require_auth();
        if !period::is_valid(first_period) {
            return Err(EngineError::InvalidPeriod);
        }

        let storage = env.storage();
        let instance = storage.instance();
        instance.set(&DataKey::Admin, &admin);
        instance.set(&DataKey::Token, &token);
        instance.set(&DataKey::RevenueLedger, &revenue_ledger);
        instance.set(&DataKey::Compliance, &compliance);
        instance.set(&DataKey::ActivityOracle, &activity_oracle);
        instance.set(&DataKey::NextPeriod, &first_period);
        instance.set(&DataKey::ProfitReserve, &0i128);

        let mut totals = Vec::new(&env);
        for (tier, config) in default_tiers().iter().enumerate() {
            instance.set(&DataKey::TierConfig(tier as u32), config);
            totals.push_back(0i128);
        }
        instance.set(&DataKey::TierTotals, &totals);
        Ok(())
    }

    // ── Staking ──────────────────────────────────────────────────────────

    /// Lock `amount` into a new position in `tier`. Returns the position index.
    pub fn stake(env: Env, owner: Address, amount: i128, tier: u32) -> Result<u32, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        owner.require_auth();

        if tier >= TIER_COUNT {
            return Err(EngineError::InvalidTier);
        }
        if amount <= 0 {
            return Err(EngineError::InvalidAmount);
        }
        let config = Self::load_tier(&env, tier)?;
        if amount < config.min_stake {
            return Err(EngineError::BelowMinimum);
        }
        let participation = Self::participation_of(&env, &owner);
        if participation < config.min_participation {
            return Err(EngineError::InsufficientParticipation);
        }

        let token_client = Self::token_client(&env)?;
        token_client.transfer(&owner, &env.current_contract_address(), &amount);

        let pending: u32 = env
            .storage()
            .instance()
            .get(&DataKey::NextPeriod)
            .ok_or(EngineError::NotInitialized)?;

        let mut positions = Self::load_positions(&env, &owner);
        let index = positions.len();
        positions.push_back(StakePosition {
            amount,
            tier,
            participation,
            next_claim_period: pending,
            accrued: 0,
            staked_at: env.ledger().timestamp(),
        });
        Self::save_positions(&env, &owner, &positions);

        let mut totals = Self::tier_totals(&env);
        Self::adjust_total(&mut totals, tier, amount)?;
        env.storage().instance().set(&DataKey::TierTotals, &totals);

        env.events().publish(
            (symbol_short!("stake"), symbol_short!("created")),
            (owner, index, amount, tier),
        );

        Ok(index)
    }

    /// Close a position and return the principal. Owed profit is paid from the
    /// reserve; whatever the reserve cannot cover is booked as unpaid for the
    /// owner to collect later.
    pub fn unstake(env: Env, owner: Address, index: u32) -> Result<i128, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        owner.require_auth();

        let mut positions = Self::load_positions(&env, &owner);
        let position = positions.get(index).ok_or(EngineError::InvalidIndex)?;

        let owed = Self::owed(&env, &position)?
            .checked_add(position.accrued)
            .ok_or(EngineError::Overflow)?;
        let paid = Self::pay_available(&env, &owner, owed)?;
        let shortfall = owed - paid;
        if shortfall > 0 {
            let unpaid = Self::unpaid_of(&env, &owner)
                .checked_add(shortfall)
                .ok_or(EngineError::Overflow)?;
            Self::save_unpaid(&env, &owner, unpaid);
        }

        // Order among an owner's positions is not significant.
        let last = positions.pop_back().ok_or(EngineError::InvalidIndex)?;
        if index < positions.len() {
            positions.set(index, last);
        }
        Self::save_positions(&env, &owner, &positions);

        let mut totals = Self::tier_totals(&env);
        Self::adjust_total(&mut totals, position.tier, -position.amount)?;
        env.storage().instance().set(&DataKey::TierTotals, &totals);

        let token_client = Self::token_client(&env)?;
        token_client.transfer(&env.current_contract_address(), &owner, &position.amount);

        env.events().publish(
            (symbol_short!("stake"), symbol_short!("removed")),
            (owner, index, position.amount, paid, shortfall),
        );

        Ok(position.amount)
    }

    /// Collect profit booked as unpaid when a position closed against a short
    /// reserve.
    pub fn claim_unpaid(env: Env, owner: Address) -> Result<i128, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        owner.require_auth();

        let unpaid = Self::unpaid_of(&env, &owner);
        if unpaid <= 0 {
            return Err(EngineError::NothingToClaim);
        }
        Self::pay_out(&env, &owner, unpaid)?;
        Self::save_unpaid(&env, &owner, 0);

        env.events().publish(
            (symbol_short!("profit"), symbol_short!("unpaid")),
            (owner, unpaid),
        );

        Ok(unpaid)
    }

    // ── Settlement ───────────────────────────────────────────────────────

    pub fn settle_period(
        env: Env,
        period: u32,
        revenue: i128,
        expenses: i128,
    ) -> Result<(), EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        let ledger: Address = env
            .storage()
            .instance()
            .get(&DataKey::RevenueLedger)
            .ok_or(EngineError::NotInitialized)?;
        ledger.require_auth();

        if !period::is_valid(period) {
            return Err(EngineError::InvalidPeriod);
        }
        let key = DataKey::Settlement(period);
        if env.storage().persistent().has(&key) {
            return Err(EngineError::AlreadySettled);
        }
        let expected: u32 = env
            .storage()
            .instance()
            .get(&DataKey::NextPeriod)
            .ok_or(EngineError::NotInitialized)?;
        if period != expected {
            return Err(EngineError::OutOfSequence);
        }
        if revenue < 0 || expenses < 0 || expenses > revenue {
            return Err(EngineError::InvalidAmount);
        }

        let net_profit = revenue - expenses;
        let agency_fee = mul_div(net_profit, AGENCY_FEE_BPS, BPS_DENOMINATOR)?;
        let distributable = net_profit - agency_fee;

        let totals = Self::tier_totals(&env);
        let mut total_staked: i128 = 0;
        for amount in totals.iter() {
            total_staked = total_staked
                .checked_add(amount)
                .ok_or(EngineError::Overflow)?;
        }

        let mut tier_snapshot = Vec::new(&env);
        let mut tier_distributed = Vec::new(&env);
        let mut distributed_sum: i128 = 0;
        for tier in 0..TIER_COUNT {
            let config = Self::load_tier(&env, tier)?;
            let staked = totals.get(tier).unwrap_or(0);
            // distributable * share * staked / total, truncated once.
            let share = if staked > 0 {
                let weight = (config.profit_share_bps as i128)
                    .checked_mul(staked)
                    .ok_or(EngineError::Overflow)?;
                let scale = BPS_DENOMINATOR
                    .checked_mul(total_staked)
                    .ok_or(EngineError::Overflow)?;
                mul_div(distributable, weight, scale)?
            } else {
                0
            };
            tier_snapshot.push_back(staked);
            tier_distributed.push_back(share);
            distributed_sum += share;
        }

        let record = SettlementRecord {
            period,
            revenue,
            expenses,
            net_profit,
            agency_fee,
            distributable,
            tier_snapshot,
            tier_distributed,
            undistributed: distributable - distributed_sum,
            settled_at: env.ledger().timestamp(),
        };
        env.storage().persistent().set(&key, &record);
        env.storage().persistent().extend_ttl(
            &key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );
        env.storage()
            .instance()
            .set(&DataKey::NextPeriod, &period::next(period));
        env.storage()
            .instance()
            .set(&DataKey::LatestSettled, &period);

        env.events().publish(
            (symbol_short!("profit"), symbol_short!("settled")),
            (period, distributable, distributed_sum),
        );

        Ok(())
    }

    /// Pay out everything a position has earned from settled periods.
    pub fn claim_profit(env: Env, owner: Address, index: u32) -> Result<i128, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        owner.require_auth();

        let mut positions = Self::load_positions(&env, &owner);
        let mut position = positions.get(index).ok_or(EngineError::InvalidIndex)?;

        let owed = Self::owed(&env, &position)?
            .checked_add(position.accrued)
            .ok_or(EngineError::Overflow)?;
        if owed <= 0 {
            return Err(EngineError::NothingToClaim);
        }
        Self::pay_out(&env, &owner, owed)?;

        position.accrued = 0;
        Self::advance_claim(&env, &mut position);
        positions.set(index, position.clone());
        Self::save_positions(&env, &owner, &positions);

        env.events().publish(
            (symbol_short!("profit"), symbol_short!("claimed")),
            (owner, index, owed, position.next_claim_period),
        );

        Ok(owed)
    }

    /// Move tokens into custody to back future claims.
    pub fn fund_profit_pool(env: Env, funder: Address, amount: i128) -> Result<i128, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        funder.require_auth();
        if amount <= 0 {
            return Err(EngineError::InvalidAmount);
        }

        let token_client = Self::token_client(&env)?;
        token_client.transfer(&funder, &env.current_contract_address(), &amount);

        let reserve = Self::profit_reserve(&env)
            .checked_add(amount)
            .ok_or(EngineError::Overflow)?;
        env.storage()
            .instance()
            .set(&DataKey::ProfitReserve, &reserve);

        env.events().publish(
            (symbol_short!("pool"), symbol_short!("funded")),
            (funder, amount, reserve),
        );

        Ok(reserve)
    }

    // ── Participation & tiers ────────────────────────────────────────────

    /// Count one completed wellness activity for `owner` and lift any
    /// position that now qualifies for a higher tier.
    pub fn record_participation(env: Env, owner: Address) -> Result<u32, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        let oracle: Address = env
            .storage()
            .instance()
            .get(&DataKey::ActivityOracle)
            .ok_or(EngineError::NotInitialized)?;
        oracle.require_auth();

        let count = Self::participation_of(&env, &owner).saturating_add(1);
        let count_key = DataKey::Participation(owner.clone());
        env.storage().persistent().set(&count_key, &count);
        env.storage().persistent().extend_ttl(
            &count_key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );

        let mut positions = Self::load_positions(&env, &owner);
        if positions.is_empty() {
            return Ok(count);
        }

        let mut tiers = Vec::new(&env);
        for tier in 0..TIER_COUNT {
            tiers.push_back(Self::load_tier(&env, tier)?);
        }
        let mut totals = Self::tier_totals(&env);

        for index in 0..positions.len() {
            let mut position = positions.get(index).ok_or(EngineError::InvalidIndex)?;
            position.participation = position.participation.saturating_add(1);

            let mut target = position.tier;
            for tier in (position.tier + 1)..TIER_COUNT {
                let config = tiers.get(tier).ok_or(EngineError::InvalidTier)?;
                if position.amount >= config.min_stake
                    && position.participation >= config.min_participation
                {
                    target = tier;
                }
            }

            if target > position.tier {
                // Bank what the old tier earned before the position leaves it.
                let owed = Self::owed(&env, &position)?;
                position.accrued = position
                    .accrued
                    .checked_add(owed)
                    .ok_or(EngineError::Overflow)?;
                Self::advance_claim(&env, &mut position);

                Self::adjust_total(&mut totals, position.tier, -position.amount)?;
                Self::adjust_total(&mut totals, target, position.amount)?;

                env.events().publish(
                    (symbol_short!("tier"), symbol_short!("upgraded")),
                    (owner.clone(), index, position.tier, target),
                );
                position.tier = target;
            }
            positions.set(index, position);
        }

        Self::save_positions(&env, &owner, &positions);
        env.storage().instance().set(&DataKey::TierTotals, &totals);

        Ok(count)
    }

    pub fn set_tier_config(
        env: Env,
        compliance: Address,
        tier: u32,
        config: TierConfig,
    ) -> Result<(), EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        compliance.require_auth();
        let stored: Address = env
            .storage()
            .instance()
            .get(&DataKey::Compliance)
            .ok_or(EngineError::NotInitialized)?;
        if compliance != stored {
            return Err(EngineError::Unauthorized);
        }
        if tier >= TIER_COUNT {
            return Err(EngineError::InvalidTier);
        }

        let mut tiers = Vec::new(&env);
        for id in 0..TIER_COUNT {
            if id == tier {
                tiers.push_back(config.clone());
            } else {
                tiers.push_back(Self::load_tier(&env, id)?);
            }
        }
        Self::validate_tiers(&tiers)?;

        env.storage()
            .instance()
            .set(&DataKey::TierConfig(tier), &config);

        env.events().publish(
            (symbol_short!("tier"), symbol_short!("config")),
            (tier, config.min_stake, config.profit_share_bps),
        );

        Ok(())
    }

    // ── Views ────────────────────────────────────────────────────────────

    /// Sum of principal held in top-tier positions.
    pub fn get_voting_weight(env: Env, owner: Address) -> i128 {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::load_positions(&env, &owner)
            .iter()
            .filter(|position| position.tier == TOP_TIER)
            .map(|position| position.amount)
            .sum()
    }

    /// Highest service-fee waiver across the owner's positions, in basis points.
    pub fn get_fee_waiver(env: Env, owner: Address) -> Result<u32, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        let mut waiver = 0u32;
        for position in Self::load_positions(&env, &owner).iter() {
            let config = Self::load_tier(&env, position.tier)?;
            waiver = waiver.max(config.fee_waiver_bps);
        }
        Ok(waiver)
    }

    pub fn get_claimable(env: Env, owner: Address, index: u32) -> Result<i128, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        let position = Self::load_positions(&env, &owner)
            .get(index)
            .ok_or(EngineError::InvalidIndex)?;
        Self::owed(&env, &position)?
            .checked_add(position.accrued)
            .ok_or(EngineError::Overflow)
    }

    pub fn get_positions(env: Env, owner: Address) -> Vec<StakePosition> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::load_positions(&env, &owner)
    }

    pub fn get_tier_config(env: Env, tier: u32) -> Result<TierConfig, EngineError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::load_tier(&env, tier)
    }

    pub fn get_tier_totals(env: Env) -> Vec<i128> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::tier_totals(&env)
    }

    pub fn get_settlement(env: Env, period: u32) -> Option<SettlementRecord> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage()
            .persistent()
            .get(&DataKey::Settlement(period))
    }

    pub fn get_next_period(env: Env) -> u32 {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage()
            .instance()
            .get(&DataKey::NextPeriod)
            .unwrap_or(0)
    }

    pub fn get_latest_settled(env: Env) -> Option<u32> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage().instance().get(&DataKey::LatestSettled)
    }

    pub fn get_participation(env: Env, owner: Address) -> u32 {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::participation_of(&env, &owner)
    }

    pub fn get_profit_reserve(env: Env) -> i128 {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::profit_reserve(&env)
    }

    pub fn get_unpaid(env: Env, owner: Address) -> i128 {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::unpaid_of(&env, &owner)
    }

    pub fn get_admin(env: Env) -> Option<Address> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage().instance().get(&DataKey::Admin)
    }

    pub fn propose_admin(
        env: Env,
        current_admin: Address,
        new_admin: Address,
    ) -> Result<(), EngineError> {
        admin::propose_admin(
            &env,
            &DataKey::Admin,
            &DataKey::PendingAdmin,
            current_admin,
            new_admin,
        )?;
        Ok(())
    }

    pub fn accept_admin(env: Env, new_admin: Address) -> Result<(), EngineError> {
        admin::accept_admin(&env, &DataKey::Admin, &DataKey::PendingAdmin, new_admin)?;
        Ok(())
    }
}

impl ProfitEngineContract {
    fn token_client(env: &Env) -> Result<token::Client<'_>, EngineError> {
        let token_addr: Address = env
            .storage()
            .instance()
            .get(&DataKey::Token)
            .ok_or(EngineError::NotInitialized)?;
        Ok(token::Client::new(env, &token_addr))
    }

    fn load_tier(env: &Env, tier: u32) -> Result<TierConfig, EngineError> {
        if tier >= TIER_COUNT {
            return Err(EngineError::InvalidTier);
        }
        env.storage()
            .instance()
            .get(&DataKey::TierConfig(tier))
            .ok_or(EngineError::NotInitialized)
    }

    fn validate_tiers(tiers: &Vec<TierConfig>) -> Result<(), EngineError> {
        let bps_cap = BPS_DENOMINATOR as u32;
        let mut share_sum = 0u32;
        let mut previous: Option<TierConfig> = None;
        for config in tiers.iter() {
            if config.min_stake <= 0
                || config.profit_share_bps > bps_cap
                || config.fee_waiver_bps > bps_cap
            {
                return Err(EngineError::InvalidTierConfig);
            }
            if let Some(prev) = previous {
                if config.min_stake < prev.min_stake
                    || config.min_participation < prev.min_participation
                {
                    return Err(EngineError::InvalidTierConfig);
                }
            }
            share_sum += config.profit_share_bps;
            previous = Some(config);
        }
        if share_sum > bps_cap {
            return Err(EngineError::InvalidTierConfig);
        }
        Ok(())
    }

    fn tier_totals(env: &Env) -> Vec<i128> {
        env.storage()
            .instance()
            .get(&DataKey::TierTotals)
            .unwrap_or_else(|| Vec::new(env))
    }

    fn adjust_total(totals: &mut Vec<i128>, tier: u32, delta: i128) -> Result<(), EngineError> {
        let current = totals.get(tier).ok_or(EngineError::InvalidTier)?;
        let updated = current.checked_add(delta).ok_or(EngineError::Overflow)?;
        totals.set(tier, updated);
        Ok(())
    }

    fn load_positions(env: &Env, owner: &Address) -> Vec<StakePosition> {
        env.storage()
            .persistent()
            .get(&DataKey::Positions(owner.clone()))
            .unwrap_or_else(|| Vec::new(env))
    }

    fn save_positions(env: &Env, owner: &Address, positions: &Vec<StakePosition>) {
        let key = DataKey::Positions(owner.clone());
        if positions.is_empty() {
            env.storage().persistent().remove(&key);
            return;
        }
        env.storage().persistent().set(&key, positions);
        env.storage().persistent().extend_ttl(
            &key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );
    }

    fn participation_of(env: &Env, owner: &Address) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::Participation(owner.clone()))
            .unwrap_or(0)
    }

    fn unpaid_of(env: &Env, owner: &Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::Unpaid(owner.clone()))
            .unwrap_or(0)
    }

    fn save_unpaid(env: &Env, owner: &Address, amount: i128) {
        let key = DataKey::Unpaid(owner.clone());
        if amount <= 0 {
            env.storage().persistent().remove(&key);
            return;
        }
        env.storage().persistent().set(&key, &amount);
        env.storage().persistent().extend_ttl(
            &key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );
    }

    fn profit_reserve(env: &Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::ProfitReserve)
            .unwrap_or(0)
    }

    /// Profit earned by `position` over every settled period it has not been
    /// paid for, read against the tier snapshot taken at each settlement.
    fn owed(env: &Env, position: &StakePosition) -> Result<i128, EngineError> {
        let latest: u32 = match env.storage().instance().get(&DataKey::LatestSettled) {
            Some(latest) => latest,
            None => return Ok(0),
        };

        let mut total: i128 = 0;
        let mut current = position.next_claim_period;
        while current <= latest {
            let record: Option<SettlementRecord> = env
                .storage()
                .persistent()
                .get(&DataKey::Settlement(current));
            if let Some(record) = record {
                let snapshot = record.tier_snapshot.get(position.tier).unwrap_or(0);
                let distributed = record.tier_distributed.get(position.tier).unwrap_or(0);
                if snapshot > 0 && distributed > 0 {
                    let share = mul_div(distributed, position.amount, snapshot)?;
                    total = total.checked_add(share).ok_or(EngineError::Overflow)?;
                }
            }
            current = period::next(current);
        }
        Ok(total)
    }

    fn advance_claim(env: &Env, position: &mut StakePosition) {
        let latest: Option<u32> = env.storage().instance().get(&DataKey::LatestSettled);
        if let Some(latest) = latest {
            if latest >= position.next_claim_period {
                position.next_claim_period = period::next(latest);
            }
        }
    }

    fn pay_out(env: &Env, owner: &Address, amount: i128) -> Result<(), EngineError> {
        let reserve = Self::profit_reserve(env);
        if reserve < amount {
            return Err(EngineError::InsufficientReserve);
        }
        env.storage()
            .instance()
            .set(&DataKey::ProfitReserve, &(reserve - amount));

        let token_client = Self::token_client(env)?;
        token_client.transfer(&env.current_contract_address(), owner, &amount);
        Ok(())
    }

    /// Pay as much of `amount` as the reserve holds. Returns what was paid.
    fn pay_available(env: &Env, owner: &Address, amount: i128) -> Result<i128, EngineError> {
        let paid = amount.min(Self::profit_reserve(env)).max(0);
        if paid > 0 {
            Self::pay_out(env, owner, paid)?;
        }
        Ok(paid)
    }
}
