use chrono::Duration;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::channels::NotificationSink;
use super::notifications::{DispatchReport, NotificationDispatcher};
use super::rules::{
    compose_message, evaluate, AlertRule, AlertRuleUpdate, AlertTrigger, EvaluationFrequency, NewAlertRule,
};
use crate::clock::Clock;
use crate::config::AlertSettings;
use crate::error::{EngineError, EngineResult};
use crate::store::{AlertRuleRepository, Stores, TriggerFilter, TriggerRepository};
use crate::tenant::TenantContext;

/// Result of asking a rule to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FireOutcome {
    Triggered {
        trigger: AlertTrigger,
        dispatch: DispatchReport,
    },
    /// Defined no-op: the rule fired less than `cooldown` ago.
    CooldownActive { rule_id: String, retry_after_secs: i64 },
}

impl FireOutcome {
    pub fn trigger(&self) -> Option<&AlertTrigger> {
        match self {
            FireOutcome::Triggered { trigger, .. } => Some(trigger),
            FireOutcome::CooldownActive { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub rule_id: String,
    pub value: f64,
    pub condition_met: bool,
    pub fired: Option<FireOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDispatch {
    pub rule_id: String,
    pub message: String,
    pub dispatch: DispatchReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_rules: usize,
    pub active_rules: usize,
    pub active_triggers: usize,
    pub active_by_type: BTreeMap<String, usize>,
    pub resolved_last_24h: usize,
}

pub struct AlertEngine {
    rules: Arc<dyn AlertRuleRepository>,
    triggers: Arc<dyn TriggerRepository>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    // Writes to one rule's trigger set and `last_triggered` go through its lock.
    rule_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AlertEngine {
    pub fn new(
        stores: &Stores,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: &AlertSettings,
    ) -> Self {
        Self {
            rules: stores.rules.clone(),
            triggers: stores.triggers.clone(),
            dispatcher: NotificationDispatcher::new(
                sink,
                std::time::Duration::from_secs(settings.dispatch_timeout_secs),
            ),
            clock,
            rule_locks: Mutex::new(HashMap::new()),
        }
    }

    fn rule_lock(&self, rule_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.rule_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // --- rule management --------------------------------------------------

    pub async fn create_rule(&self, ctx: &TenantContext, new: NewAlertRule) -> EngineResult<AlertRule> {
        let rule = AlertRule::from_new(&ctx.tenant_id, new, self.clock.now())?;
        self.rules.insert_rule(&rule).await?;
        info!(tenant_id = %ctx.tenant_id, rule_id = %rule.id, "Created alert rule '{}'", rule.name);
        Ok(rule)
    }

    pub async fn update_rule(&self, ctx: &TenantContext, rule_id: &str, update: AlertRuleUpdate) -> EngineResult<AlertRule> {
        let lock = self.rule_lock(rule_id);
        let _guard = lock.lock().await;

        let mut rule = self.get_rule(ctx, rule_id).await?;
        rule.apply(update, self.clock.now())?;
        self.rules.update_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn set_active(&self, ctx: &TenantContext, rule_id: &str, active: bool) -> EngineResult<AlertRule> {
        self.update_rule(
            ctx,
            rule_id,
            AlertRuleUpdate {
                active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    /// Removes the rule; its triggers stay for audit.
    pub async fn delete_rule(&self, ctx: &TenantContext, rule_id: &str) -> EngineResult<()> {
        let rule = self.get_rule(ctx, rule_id).await?;
        self.rules.delete_rule(&rule.id).await?;
        self.rule_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&rule.id);
        Ok(())
    }

    pub async fn get_rule(&self, ctx: &TenantContext, rule_id: &str) -> EngineResult<AlertRule> {
        match self.rules.get_rule(rule_id).await? {
            Some(rule) if ctx.can_access(&rule.tenant_id) => Ok(rule),
            _ => Err(EngineError::UnknownRule(rule_id.to_string())),
        }
    }

    pub async fn list_rules(&self, tenant_id: &str) -> EngineResult<Vec<AlertRule>> {
        self.rules.list_rules(tenant_id).await
    }

    /// Active rules of a tenant evaluated at `frequency`.
    pub async fn rules_due(&self, tenant_id: &str, frequency: EvaluationFrequency) -> EngineResult<Vec<AlertRule>> {
        Ok(self
            .rules
            .list_rules(tenant_id)
            .await?
            .into_iter()
            .filter(|r| r.active && r.frequency == frequency)
            .collect())
    }

    pub async fn tenants(&self) -> EngineResult<Vec<String>> {
        self.rules.rule_tenants().await
    }

    // --- evaluation and firing -------------------------------------------

    pub fn evaluate(&self, rule: &AlertRule, value: f64) -> EngineResult<bool> {
        evaluate(rule, value)
    }

    /// Create a trigger unless the rule is inside its cooldown window.
    ///
    /// The rule is re-read under its lock so concurrent callers observe each
    /// other's `last_triggered`. Notification happens after the trigger is
    /// persisted; channel failures are stored on the trigger.
    pub async fn fire(&self, rule: &AlertRule, value: f64) -> EngineResult<FireOutcome> {
        let lock = self.rule_lock(&rule.id);
        let guard = lock.lock().await;

        let mut current = self
            .rules
            .get_rule(&rule.id)
            .await?
            .ok_or_else(|| EngineError::UnknownRule(rule.id.clone()))?;
        let now = self.clock.now();

        if let Some(remaining) = current.cooldown_remaining(now)? {
            debug!(rule_id = %current.id, remaining_secs = remaining.num_seconds(), "Alert cooldown active");
            return Ok(FireOutcome::CooldownActive {
                rule_id: current.id,
                retry_after_secs: remaining.num_seconds(),
            });
        }

        let mut trigger = AlertTrigger::new(&current, value, now);
        current.last_triggered = Some(now);
        current.trigger_count += 1;
        self.triggers.record_firing(&current, &trigger).await?;
        drop(guard);

        info!(
            tenant_id = %current.tenant_id,
            rule_id = %current.id,
            trigger_id = %trigger.id,
            value,
            "Alert triggered"
        );

        let dispatch = self.dispatcher.dispatch(&current, &trigger.message).await;
        if !dispatch.failures.is_empty() {
            trigger.dispatch_failures = dispatch.failures.clone();
            if let Err(e) = self.triggers.update_trigger(&trigger).await {
                warn!(trigger_id = %trigger.id, "Failed to record dispatch failures: {}", e);
            }
        }

        Ok(FireOutcome::Triggered { trigger, dispatch })
    }

    pub async fn evaluate_and_fire(&self, rule_id: &str, value: f64) -> EngineResult<EvaluationOutcome> {
        let rule = self
            .rules
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| EngineError::UnknownRule(rule_id.to_string()))?;
        self.evaluate_rule(&rule, value).await
    }

    /// Evaluate an already loaded rule and fire it when the condition holds.
    pub async fn evaluate_rule(&self, rule: &AlertRule, value: f64) -> EngineResult<EvaluationOutcome> {
        let condition_met = evaluate(rule, value)?;
        let fired = if condition_met {
            Some(self.fire(rule, value).await?)
        } else {
            None
        };
        Ok(EvaluationOutcome {
            rule_id: rule.id.clone(),
            value,
            condition_met,
            fired,
        })
    }

    /// Evaluate already resolved `(rule, value)` pairs concurrently. A failing
    /// rule is logged and left out; it never blocks the others.
    pub async fn evaluate_all(&self, pending: &[(AlertRule, f64)]) -> Vec<EvaluationOutcome> {
        let results = join_all(pending.iter().map(|(rule, value)| self.evaluate_rule(rule, *value))).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for ((rule, _), result) in pending.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(tenant_id = %rule.tenant_id, rule_id = %rule.id, "Realtime evaluation failed: {}", e),
            }
        }
        outcomes
    }

    // --- resolution and authoring tools ----------------------------------

    /// Mark a trigger resolved by the calling actor. Does not touch the rule.
    pub async fn resolve(&self, ctx: &TenantContext, trigger_id: &str) -> EngineResult<AlertTrigger> {
        let trigger = self.visible_trigger(ctx, trigger_id).await?;
        let lock = self.rule_lock(&trigger.rule_id);
        let _guard = lock.lock().await;

        // re-read under the lock; a concurrent resolve may have won
        let mut trigger = self
            .triggers
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| EngineError::UnknownTrigger(trigger_id.to_string()))?;
        if trigger.resolved {
            return Err(EngineError::AlreadyResolved(trigger.id));
        }

        trigger.resolved = true;
        trigger.resolved_at = Some(self.clock.now());
        trigger.resolved_by = Some(ctx.actor_id.clone());
        self.triggers.update_trigger(&trigger).await?;
        info!(tenant_id = %trigger.tenant_id, trigger_id = %trigger.id, resolved_by = %ctx.actor_id, "Alert resolved");
        Ok(trigger)
    }

    /// Dry-run dispatch for rule authoring. Persists nothing and leaves the
    /// cooldown untouched.
    pub async fn test(&self, ctx: &TenantContext, rule_id: &str) -> EngineResult<TestDispatch> {
        let rule = self.get_rule(ctx, rule_id).await?;
        let message = format!("[TEST] {}", compose_message(&rule, rule.threshold));
        let dispatch = self.dispatcher.dispatch(&rule, &message).await;
        Ok(TestDispatch {
            rule_id: rule.id,
            message,
            dispatch,
        })
    }

    async fn visible_trigger(&self, ctx: &TenantContext, trigger_id: &str) -> EngineResult<AlertTrigger> {
        match self.triggers.get_trigger(trigger_id).await? {
            Some(t) if ctx.can_access(&t.tenant_id) => Ok(t),
            _ => Err(EngineError::UnknownTrigger(trigger_id.to_string())),
        }
    }

    pub async fn get_trigger(&self, ctx: &TenantContext, trigger_id: &str) -> EngineResult<AlertTrigger> {
        self.visible_trigger(ctx, trigger_id).await
    }

    pub async fn list_triggers(&self, tenant_id: &str, filter: &TriggerFilter) -> EngineResult<Vec<AlertTrigger>> {
        self.triggers.list_triggers(tenant_id, filter).await
    }

    pub async fn active_triggers(&self, tenant_id: &str) -> EngineResult<Vec<AlertTrigger>> {
        self.list_triggers(
            tenant_id,
            &TriggerFilter {
                unresolved_only: true,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn stats(&self, tenant_id: &str) -> EngineResult<AlertStats> {
        let rules = self.rules.list_rules(tenant_id).await?;
        let active = self.active_triggers(tenant_id).await?;
        let day_ago = self.clock.now() - Duration::hours(24);
        let resolved_last_24h = self
            .list_triggers(tenant_id, &TriggerFilter::default())
            .await?
            .iter()
            .filter(|t| t.resolved_at.is_some_and(|at| at >= day_ago))
            .count();

        let mut active_by_type = BTreeMap::new();
        for trigger in &active {
            *active_by_type
                .entry(trigger.alert_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(AlertStats {
            total_rules: rules.len(),
            active_rules: rules.iter().filter(|r| r.active).count(),
            active_triggers: active.len(),
            active_by_type,
            resolved_last_24h,
        })
    }
}
