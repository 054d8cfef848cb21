//! Solace - Revenue Ledger (Soroban)
//! Quorum-approved periodic revenue reports with a dispute window. Finalized
//! reports settle into the profit engine.

#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, Address, Env, String, Vec,
};
use solace_common::{
    admin, period, AdminError, ProfitEngineClient, INSTANCE_BUMP_AMOUNT,
    INSTANCE_LIFETIME_THRESHOLD, PERSISTENT_BUMP_AMOUNT, PERSISTENT_LIFETIME_THRESHOLD,
};

pub const ROSTER_SIZE: u32 = 5;
pub const QUORUM: u32 = 3;
pub const DISPUTE_WINDOW_SECS: u64 = 48 * 60 * 60;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LedgerError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidRoster = 4,
    InvalidPeriod = 5,
    StalePeriod = 6,
    DuplicatePeriod = 7,
    InvalidAmount = 8,
    NegativeProfit = 9,
    BreakdownMismatch = 10,
    NotFound = 11,
    AlreadyFinalized = 12,
    AlreadyChallenged = 13,
    DuplicateApproval = 14,
    SelfApproval = 15,
    DisputeWindowClosed = 16,
    InsufficientApprovals = 17,
    DisputeWindowOpen = 18,
    Challenged = 19,
    SettlementFailed = 20,
    NoPendingAdmin = 21,
}

impl From<AdminError> for LedgerError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::NotInitialized => LedgerError::NotInitialized,
            AdminError::Unauthorized => LedgerError::Unauthorized,
            AdminError::NoPendingAdmin => LedgerError::NoPendingAdmin,
        }
    }
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportStatus {
    Submitted,
    Challenged,
    Finalized,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RevenueSource {
    pub name: String,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeriodReport {
    pub period: u32,
    pub submitter: Address,
    pub total_revenue: i128,
    pub total_expenses: i128,
    pub breakdown: Vec<RevenueSource>,
    pub submitted_at: u64,
    pub dispute_deadline: u64,
    pub approvals: Vec<Address>,
    pub status: ReportStatus,
    pub challenged_by: Option<Address>,
    pub challenge_reason: Option<String>,
    pub finalized_at: Option<u64>,
}

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Admin,
    PendingAdmin,
    Roster,
    Auditors,
    ProfitEngine,
    LastFinalized,
    Report(u32),
}

#[contract]
pub struct RevenueLedgerContract;

#[contractimpl]
impl RevenueLedgerContract {
    pub fn initialize(
        env: Env,
        admin: Address,
        roster: Vec<Address>,
        auditors: Vec<Address>,
        profit_engine: Address,
    ) -> Result<(), LedgerError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(LedgerError::AlreadyInitialized);
        }
        admin.require_auth();

        if roster.len() != ROSTER_SIZE || has_duplicates(&roster) {
            return Err(LedgerError::InvalidRoster);
        }
        if auditors.is_empty() || has_duplicates(&auditors) {
            return Err(LedgerError::InvalidRoster);
        }
        if auditors.iter().any(|auditor| roster.contains(&auditor)) {
            return Err(LedgerError::InvalidRoster);
        }

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Roster, &roster);
        env.storage().instance().set(&DataKey::Auditors, &auditors);
        env.storage()
            .instance()
            .set(&DataKey::ProfitEngine, &profit_engine);
        env.storage().instance().set(&DataKey::LastFinalized, &0u32);
        Ok(())
    }

    /// File the report for `period`. Returns the dispute deadline.
    pub fn submit_report(
        env: Env,
        submitter: Address,
        period: u32,
        revenue: i128,
        expenses: i128,
        breakdown: Vec<RevenueSource>,
    ) -> Result<u64, LedgerError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        submitter.require_auth();
        Self::require_finance(&env, &submitter)?;

        if !period::is_valid(period) {
            return Err(LedgerError::InvalidPeriod);
        }
        if env.storage().persistent().has(&DataKey::Report(period)) {
            return Err(LedgerError::DuplicatePeriod);
        }
        if period <= Self::last_finalized(&env) {
            return Err(LedgerError::StalePeriod);
        }
        if revenue < 0 || expenses < 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if expenses > revenue {
            return Err(LedgerError::NegativeProfit);
        }

        let mut breakdown_total: i128 = 0;
        for source in breakdown.iter() {
            if source.amount < 0 {
                return Err(LedgerError::InvalidAmount);
            }
            breakdown_total = breakdown_total
                .checked_add(source.amount)
                .ok_or(LedgerError::BreakdownMismatch)?;
        }
        if breakdown_total != revenue {
            return Err(LedgerError::BreakdownMismatch);
        }

        let now = env.ledger().timestamp();
        let report = PeriodReport {
            period,
            submitter: submitter.clone(),
            total_revenue: revenue,
            total_expenses: expenses,
            breakdown,
            submitted_at: now,
            dispute_deadline: now + DISPUTE_WINDOW_SECS,
            approvals: Vec::new(&env),
            status: ReportStatus::Submitted,
            challenged_by: None,
            challenge_reason: None,
            finalized_at: None,
        };
        Self::save_report(&env, &report);

        env.events().publish(
            (symbol_short!("report"), symbol_short!("submitted")),
            (period, submitter, revenue, expenses),
        );

        Ok(report.dispute_deadline)
    }

    /// Add one approval. Once quorum is met after the dispute window has
    /// closed, the report finalizes in the same call.
    pub fn approve_report(
        env: Env,
        approver: Address,
        period: u32,
    ) -> Result<ReportStatus, LedgerError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        approver.require_auth();
        Self::require_finance(&env, &approver)?;

        let mut report = Self::load_report(&env, period)?;
        match report.status {
            ReportStatus::Finalized => return Err(LedgerError::AlreadyFinalized),
            ReportStatus::Challenged => return Err(LedgerError::AlreadyChallenged),
            ReportStatus::Submitted => {}
        }
        if report.submitter == approver {
            return Err(LedgerError::SelfApproval);
        }
        if report.approvals.contains(&approver) {
            return Err(LedgerError::DuplicateApproval);
        }

        report.approvals.push_back(approver.clone());
        Self::save_report(&env, &report);

        env.events().publish(
            (symbol_short!("report"), symbol_short!("approved")),
            (period, approver, report.approvals.len()),
        );

        if Self::check_finalizable(&env, &report).is_err() {
            return Ok(report.status);
        }
        match Self::finalize(&env, report) {
            Ok(_) => Ok(ReportStatus::Finalized),
            Err(err) => {
                // The approval stands; finalize_report can be retried.
                env.events().publish(
                    (symbol_short!("report"), symbol_short!("fin_fail")),
                    (period, err as u32),
                );
                Ok(ReportStatus::Submitted)
            }
        }
    }

    /// Block finalization of `period`. Only a revoke clears a challenge.
    pub fn challenge_report(
        env: Env,
        auditor: Address,
        period: u32,
        reason: String,
    ) -> Result<(), LedgerError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        auditor.require_auth();
        let auditors: Vec<Address> = env
            .storage()
            .instance()
            .get(&DataKey::Auditors)
            .ok_or(LedgerError::NotInitialized)?;
        if !auditors.contains(&auditor) {
            return Err(LedgerError::Unauthorized);
        }

        let mut report = Self::load_report(&env, period)?;
        match report.status {
            ReportStatus::Finalized => return Err(LedgerError::AlreadyFinalized),
            ReportStatus::Challenged => return Err(LedgerError::AlreadyChallenged),
            ReportStatus::Submitted => {}
        }
        if env.ledger().timestamp() >= report.dispute_deadline {
            return Err(LedgerError::DisputeWindowClosed);
        }

        report.status = ReportStatus::Challenged;
        report.challenged_by = Some(auditor.clone());
        report.challenge_reason = Some(reason.clone());
        Self::save_report(&env, &report);

        env.events().publish(
            (symbol_short!("report"), symbol_short!("challenge")),
            (period, auditor, reason),
        );

        Ok(())
    }

    /// Finalize a report whose quorum and dispute window are both satisfied.
    /// Returns the net profit handed to the profit engine.
    pub fn finalize_report(env: Env, period: u32) -> Result<i128, LedgerError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        let report = Self::load_report(&env, period)?;
        Self::finalize(&env, report)
    }

    pub fn revoke_report(
        env: Env,
        admin: Address,
        period: u32,
        reason: String,
    ) -> Result<(), LedgerError> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        admin::require_admin(&env, &DataKey::Admin, &admin)?;

        let report = Self::load_report(&env, period)?;
        if report.status == ReportStatus::Finalized {
            return Err(LedgerError::AlreadyFinalized);
        }
        env.storage().persistent().remove(&DataKey::Report(period));

        env.events().publish(
            (symbol_short!("report"), symbol_short!("revoked")),
            (period, admin, reason),
        );

        Ok(())
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub fn get_report(env: Env, period: u32) -> Option<PeriodReport> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage().persistent().get(&DataKey::Report(period))
    }

    pub fn get_status(env: Env, period: u32) -> Option<ReportStatus> {
        Self::get_report(env, period).map(|report| report.status)
    }

    pub fn is_finalizable(env: Env, period: u32) -> bool {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        match Self::load_report(&env, period) {
            Ok(report) => Self::check_finalizable(&env, &report).is_ok(),
            Err(_) => false,
        }
    }

    pub fn get_last_finalized(env: Env) -> u32 {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        Self::last_finalized(&env)
    }

    pub fn get_roster(env: Env) -> Vec<Address> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage()
            .instance()
            .get(&DataKey::Roster)
            .unwrap_or_else(|| Vec::new(&env))
    }

    pub fn get_auditors(env: Env) -> Vec<Address> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage()
            .instance()
            .get(&DataKey::Auditors)
            .unwrap_or_else(|| Vec::new(&env))
    }

    pub fn get_profit_engine(env: Env) -> Option<Address> {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        env.storage().instance().get(&DataKey::ProfitEngine)
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
    ) -> Result<(), LedgerError> {
        admin::propose_admin(
            &env,
            &DataKey::Admin,
            &DataKey::PendingAdmin,
            current_admin,
            new_admin,
        )?;
        Ok(())
    }

    pub fn accept_admin(env: Env, new_admin: Address) -> Result<(), LedgerError> {
        admin::accept_admin(&env, &DataKey::Admin, &DataKey::PendingAdmin, new_admin)?;
        Ok(())
    }
}

impl RevenueLedgerContract {
    fn require_finance(env: &Env, who: &Address) -> Result<(), LedgerError> {
        let roster: Vec<Address> = env
            .storage()
            .instance()
            .get(&DataKey::Roster)
            .ok_or(LedgerError::NotInitialized)?;
        if !roster.contains(who) {
            return Err(LedgerError::Unauthorized);
        }
        Ok(())
    }

    fn last_finalized(env: &Env) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::LastFinalized)
            .unwrap_or(0)
    }

    fn load_report(env: &Env, period: u32) -> Result<PeriodReport, LedgerError> {
        env.storage()
            .persistent()
            .get(&DataKey::Report(period))
            .ok_or(LedgerError::NotFound)
    }

    fn save_report(env: &Env, report: &PeriodReport) {
        let key = DataKey::Report(report.period);
        env.storage().persistent().set(&key, report);
        env.storage().persistent().extend_ttl(
            &key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );
    }

    fn check_finalizable(env: &Env, report: &PeriodReport) -> Result<(), LedgerError> {
        match report.status {
            ReportStatus::Finalized => return Err(LedgerError::AlreadyFinalized),
            ReportStatus::Challenged => return Err(LedgerError::Challenged),
            ReportStatus::Submitted => {}
        }
        if report.approvals.len() < QUORUM {
            return Err(LedgerError::InsufficientApprovals);
        }
        if env.ledger().timestamp() < report.dispute_deadline {
            return Err(LedgerError::DisputeWindowOpen);
        }
        Ok(())
    }

    /// Settle downstream first and only then mark the report finalized, so a
    /// rejected settlement leaves nothing behind on either side.
    fn finalize(env: &Env, mut report: PeriodReport) -> Result<i128, LedgerError> {
        Self::check_finalizable(env, &report)?;

        let engine: Address = env
            .storage()
            .instance()
            .get(&DataKey::ProfitEngine)
            .ok_or(LedgerError::NotInitialized)?;
        let settled = ProfitEngineClient::new(env, &engine).try_settle_period(
            &report.period,
            &report.total_revenue,
            &report.total_expenses,
        );
        if !matches!(settled, Ok(Ok(()))) {
            return Err(LedgerError::SettlementFailed);
        }

        let net_profit = report.total_revenue - report.total_expenses;
        report.status = ReportStatus::Finalized;
        report.finalized_at = Some(env.ledger().timestamp());
        Self::save_report(env, &report);

        if report.period > Self::last_finalized(env) {
            env.storage()
                .instance()
                .set(&DataKey::LastFinalized, &report.period);
        }

        env.events().publish(
            (symbol_short!("report"), symbol_short!("finalized")),
            (report.period, net_profit),
        );

        Ok(net_profit)
    }
}

fn has_duplicates(addresses: &Vec<Address>) -> bool {
    for i in 0..addresses.len() {
        for j in (i + 1)..addresses.len() {
            if addresses.get(i) == addresses.get(j) {
                return true;
            }
        }
    }
    false
}
