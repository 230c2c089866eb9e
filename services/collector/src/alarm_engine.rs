//! AlarmEngine: matches incoming values against alarm rules and drives
//! the occurrence lifecycle
//! `INACTIVE -> ACTIVE -> (ACKNOWLEDGED) -> CLEARED -> INACTIVE`.

use crate::cache_writer::CacheWriter;
use collector_calc::{CalcEngine, StateStore};
use collector_errors::Result;
use collector_model::alarm::{AlarmKind, AlarmOccurrence, AlarmRule, OccurrenceState, TriggerCondition};
use collector_model::value::Value;
use collector_model::PointId;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One in-flight occurrence the engine is tracking for a rule, distinct
/// from `collector_model::alarm::AlarmOccurrence`'s persisted form so the
/// engine can hold the allocated id across writes.
struct TrackedOccurrence {
    occurrence: AlarmOccurrence,
}

pub struct AlarmEngine<S: StateStore> {
    rules: HashMap<PointId, Vec<AlarmRule>>,
    active: DashMap<i64, TrackedOccurrence>,
    /// Previous raw numeric value per rule id, used for message scripts'
    /// `prev_value` input.
    last_value: DashMap<i64, f64>,
    /// Previous boolean reading per digital rule id, used to detect the
    /// transition `on_change` requires.
    last_digital: DashMap<i64, bool>,
    next_occurrence_id: AtomicI64,
    calc: CalcEngine<S>,
    cache_writer: Arc<CacheWriter>,
    script_deadline: Duration,
}

impl<S: StateStore> AlarmEngine<S> {
    pub fn new(rules: Vec<AlarmRule>, calc: CalcEngine<S>, cache_writer: Arc<CacheWriter>, script_deadline: Duration) -> Self {
        let mut by_target: HashMap<PointId, Vec<AlarmRule>> = HashMap::new();
        for rule in rules {
            if rule.enabled {
                by_target.entry(rule.target_id).or_default().push(rule);
            }
        }
        Self {
            rules: by_target,
            active: DashMap::new(),
            last_value: DashMap::new(),
            last_digital: DashMap::new(),
            next_occurrence_id: AtomicI64::new(1),
            calc,
            cache_writer,
            script_deadline,
        }
    }

    /// Restores in-flight occurrences at startup without re-evaluating
    /// rules against them: the occurrence's own state is authoritative,
    /// only the engine's bookkeeping and cache need to catch up. Each
    /// restored occurrence is written through the cache writer exactly as
    /// `open_occurrence` would, so `alarm:active:*` and the alarm
    /// channels reflect what was already persisted, without creating any
    /// new occurrence rows.
    pub async fn recover_occurrences(&self, occurrences: Vec<AlarmOccurrence>) {
        for occurrence in occurrences {
            if !occurrence.state.is_non_terminal() {
                continue;
            }
            let id = occurrence.id;
            self.next_occurrence_id.fetch_max(id + 1, Ordering::SeqCst);
            self.cache_writer.write_alarm_active(occurrence.rule_id, &occurrence).await;
            self.active.insert(id, TrackedOccurrence { occurrence });
        }
    }

    /// Evaluates every rule targeting `point_id` against `value`, updating
    /// occurrence state and writing through the cache writer. Returns the
    /// occurrences that changed state this call, for the config store to
    /// persist.
    pub async fn evaluate_point(&self, point_id: PointId, value: &Value, timestamp: i64) -> Result<Vec<AlarmOccurrence>> {
        let Some(rules) = self.rules.get(&point_id) else {
            return Ok(Vec::new());
        };
        let mut changed = Vec::new();
        for rule in rules {
            if let Some(occurrence) = self.evaluate_rule(rule, value, timestamp).await? {
                changed.push(occurrence);
            }
        }
        Ok(changed)
    }

    async fn evaluate_rule(&self, rule: &AlarmRule, value: &Value, timestamp: i64) -> Result<Option<AlarmOccurrence>> {
        let prev_value = value.as_f64().and_then(|v| self.last_value.insert(rule.id, v));

        let triggered = match rule.kind {
            AlarmKind::Analog => self.analog_triggered(rule, value),
            AlarmKind::Digital => {
                let b = matches!(value, Value::Bool(true)) || matches!(value, Value::Int(i) if *i != 0);
                let prev_b = self.last_digital.insert(rule.id, b);
                Self::digital_triggered(rule, b, prev_b)
            }
            AlarmKind::Script => self.script_triggered(rule, value).await?,
        };

        let existing_id = self
            .active
            .iter()
            .find(|e| e.occurrence.rule_id == rule.id)
            .map(|e| *e.key());

        match (triggered, existing_id) {
            (true, None) => Ok(Some(self.open_occurrence(rule, value, timestamp, prev_value).await)),
            (true, Some(id)) => {
                // Already active: update the tracked trigger value but
                // don't reopen or republish.
                if let Some(mut entry) = self.active.get_mut(&id) {
                    entry.occurrence.trigger_value = value.as_f64().unwrap_or(0.0);
                }
                Ok(None)
            }
            (false, Some(id)) if rule.auto_clear => Ok(self.clear_occurrence(rule, id, timestamp).await),
            _ => Ok(None),
        }
    }

    /// Analog thresholds use symmetric hysteresis of `deadband / 2` on
    /// each side of a limit: once ACTIVE, the value must cross back past
    /// `limit -/+ deadband/2` before the rule is considered cleared.
    fn analog_triggered(&self, rule: &AlarmRule, value: &Value) -> bool {
        let Some(v) = value.as_f64() else { return false };
        let half_band = rule.deadband / 2.0;
        let is_active = self.active.iter().any(|e| e.occurrence.rule_id == rule.id);

        let over = |limit: f64| if is_active { v >= limit - half_band } else { v >= limit };
        let under = |limit: f64| if is_active { v <= limit + half_band } else { v <= limit };

        rule.high_high.is_some_and(over)
            || rule.high.is_some_and(over)
            || rule.low.is_some_and(under)
            || rule.low_low.is_some_and(under)
    }

    /// `on_true`/unset: triggered whenever the reading is true. `on_false`:
    /// triggered whenever it's false. `on_change`: triggered only on the
    /// transition itself, not on either steady level; the first reading
    /// for a rule has no previous value to compare against and never
    /// triggers.
    fn digital_triggered(rule: &AlarmRule, b: bool, prev: Option<bool>) -> bool {
        match rule.trigger_condition {
            Some(TriggerCondition::OnFalse) => !b,
            Some(TriggerCondition::OnChange) => prev.is_some_and(|p| p != b),
            _ => b,
        }
    }

    async fn script_triggered(&self, rule: &AlarmRule, value: &Value) -> Result<bool> {
        let Some(script) = &rule.condition_script else {
            return Ok(false);
        };
        let mut vars = HashMap::new();
        if let Some(v) = value.as_f64() {
            vars.insert("value".to_string(), v);
        }
        let result = self.calc.evaluate(script, &vars, &HashMap::new(), self.script_deadline).await?;
        Ok(result != 0.0)
    }

    async fn open_occurrence(&self, rule: &AlarmRule, value: &Value, timestamp: i64, prev_value: Option<f64>) -> AlarmOccurrence {
        let id = self.next_occurrence_id.fetch_add(1, Ordering::SeqCst);
        let message = self.render_message(rule, value, prev_value).await;
        let occurrence = AlarmOccurrence {
            id,
            rule_id: rule.id,
            tenant_id: rule.tenant_id,
            occurrence_time: timestamp,
            trigger_value: value.as_f64().unwrap_or(0.0),
            state: OccurrenceState::Active,
            severity: rule.severity,
            cleared_time: None,
            ack_time: None,
            context_data: serde_json::json!({ "message": message }),
        };
        self.active.insert(id, TrackedOccurrence { occurrence: occurrence.clone() });
        self.cache_writer.write_alarm_active(rule.id, &occurrence).await;
        occurrence
    }

    async fn clear_occurrence(&self, rule: &AlarmRule, id: i64, timestamp: i64) -> Option<AlarmOccurrence> {
        let (_, tracked) = self.active.remove(&id)?;
        let mut occurrence = tracked.occurrence;
        occurrence.state = OccurrenceState::Cleared;
        occurrence.cleared_time = Some(timestamp);
        self.cache_writer.clear_alarm_active(rule.id, &occurrence).await;
        Some(occurrence)
    }

    /// Builds the alarm message. When `message_script` is set it overrides
    /// the template outright: it's run through the same sandbox as alarm
    /// condition scripts, with `value`, `prev_value`, `rule`, and `point`
    /// available to it; a script error falls back to the template rather
    /// than failing the occurrence. Otherwise substitutes `{value}`,
    /// `{limit}`, `{point_name}` in the template, where `{limit}` resolves
    /// to whichever threshold is nearest the triggering value when
    /// several are set.
    async fn render_message(&self, rule: &AlarmRule, value: &Value, prev_value: Option<f64>) -> String {
        let v = value.as_f64().unwrap_or(0.0);

        if let Some(script) = &rule.message_script {
            let mut numeric = HashMap::new();
            numeric.insert("value".to_string(), v);
            if let Some(p) = prev_value {
                numeric.insert("prev_value".to_string(), p);
            }
            let mut text = HashMap::new();
            text.insert("rule".to_string(), rule.name.clone());
            text.insert("point".to_string(), rule.target_id.to_string());
            match self.calc.evaluate_text(script, &numeric, &text, self.script_deadline).await {
                Ok(message) => return message,
                Err(err) => warn!(rule_id = rule.id, %err, "message_script evaluation failed, falling back to template"),
            }
        }

        let limit = [rule.high_high, rule.high, rule.low, rule.low_low]
            .into_iter()
            .flatten()
            .min_by(|a, b| (a - v).abs().partial_cmp(&(b - v).abs()).unwrap())
            .unwrap_or(0.0);
        rule.message_template
            .replace("{value}", &v.to_string())
            .replace("{limit}", &limit.to_string())
            .replace("{point_name}", &rule.name)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Every occurrence currently ACTIVE or ACKNOWLEDGED, for introspection
    /// callers (and tests) that need the occurrence's own fields rather
    /// than just a count.
    pub fn active_occurrences(&self) -> Vec<AlarmOccurrence> {
        self.active.iter().map(|e| e.occurrence.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_calc::MemoryStateStore;
    use collector_model::alarm::{Severity, TargetType};
    use collector_rtdb::MemoryRtdb;

    fn threshold_rule() -> AlarmRule {
        AlarmRule {
            id: 1,
            tenant_id: 1,
            name: "tank level".into(),
            target_type: TargetType::DataPoint,
            target_id: 10,
            kind: AlarmKind::Analog,
            high_high: Some(90.0),
            high: Some(80.0),
            low: None,
            low_low: None,
            deadband: 2.0,
            trigger_condition: None,
            condition_script: None,
            message_template: "{point_name} at {value}, limit {limit}".into(),
            message_script: None,
            severity: Severity::High,
            priority: 0,
            auto_clear: true,
            enabled: true,
        }
    }

    fn engine(rule: AlarmRule) -> AlarmEngine<MemoryStateStore> {
        let rtdb = Arc::new(MemoryRtdb::new());
        let cache_writer = Arc::new(CacheWriter::new(rtdb, 300_000));
        let calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "alarm-test");
        AlarmEngine::new(vec![rule], calc, cache_writer, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn crossing_high_threshold_opens_occurrence() {
        let e = engine(threshold_rule());
        let changed = e.evaluate_point(10, &Value::Float(85.0), 1000).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].state, OccurrenceState::Active);
        assert_eq!(e.active_count(), 1);
    }

    #[tokio::test]
    async fn dropping_below_hysteresis_band_clears() {
        let e = engine(threshold_rule());
        e.evaluate_point(10, &Value::Float(85.0), 1000).await.unwrap();
        // still within the hysteresis band (80 - 1.0 = 79), should stay active
        let changed = e.evaluate_point(10, &Value::Float(79.5), 2000).await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(e.active_count(), 1);

        // below the band now, should clear
        let changed = e.evaluate_point(10, &Value::Float(78.0), 3000).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].state, OccurrenceState::Cleared);
        assert_eq!(e.active_count(), 0);
    }

    #[tokio::test]
    async fn recovered_occurrence_is_tracked_without_reevaluation() {
        let e = engine(threshold_rule());
        let recovered = AlarmOccurrence {
            id: 99,
            rule_id: 1,
            tenant_id: 1,
            occurrence_time: 500,
            trigger_value: 95.0,
            state: OccurrenceState::Active,
            severity: Severity::High,
            cleared_time: None,
            ack_time: None,
            context_data: serde_json::Value::Null,
        };
        e.recover_occurrences(vec![recovered]).await;
        assert_eq!(e.active_count(), 1);
    }

    #[tokio::test]
    async fn message_template_substitution() {
        let e = engine(threshold_rule());
        let msg = e.render_message(&threshold_rule(), &Value::Float(85.0), None).await;
        assert!(msg.contains("tank level"));
        assert!(msg.contains("85"));
    }

    #[tokio::test]
    async fn message_script_overrides_template() {
        let mut rule = threshold_rule();
        rule.message_script = Some("\"override\"".into());
        let e = engine(rule.clone());
        let msg = e.render_message(&rule, &Value::Float(85.0), None).await;
        assert_eq!(msg, "override");
    }

    #[tokio::test]
    async fn retrigger_while_active_updates_trigger_value_without_new_occurrence() {
        let e = engine(threshold_rule());
        let changed = e.evaluate_point(10, &Value::Float(85.0), 1000).await.unwrap();
        assert_eq!(changed.len(), 1);
        let id = changed[0].id;

        let changed = e.evaluate_point(10, &Value::Float(88.0), 2000).await.unwrap();
        assert!(changed.is_empty(), "re-trigger while active must not open a new occurrence");
        assert_eq!(e.active_count(), 1);
        let updated = e
            .active_occurrences()
            .into_iter()
            .find(|o| o.id == id)
            .expect("occurrence still tracked");
        assert_eq!(updated.trigger_value, 88.0);
    }

    fn digital_rule(trigger_condition: Option<TriggerCondition>) -> AlarmRule {
        AlarmRule {
            id: 2,
            tenant_id: 1,
            name: "door open".into(),
            target_type: TargetType::DataPoint,
            target_id: 20,
            kind: AlarmKind::Digital,
            high_high: None,
            high: None,
            low: None,
            low_low: None,
            deadband: 0.0,
            trigger_condition,
            condition_script: None,
            message_template: "{point_name} changed".into(),
            message_script: None,
            severity: Severity::Medium,
            priority: 0,
            auto_clear: true,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn digital_on_change_fires_on_falling_edge() {
        let e = engine(digital_rule(Some(TriggerCondition::OnChange)));
        // first reading has no previous value, never triggers
        let changed = e.evaluate_point(20, &Value::Bool(true), 1000).await.unwrap();
        assert!(changed.is_empty());
        // steady true, no edge
        let changed = e.evaluate_point(20, &Value::Bool(true), 2000).await.unwrap();
        assert!(changed.is_empty());
        // 1 -> 0 edge, should fire
        let changed = e.evaluate_point(20, &Value::Bool(false), 3000).await.unwrap();
        assert_eq!(changed.len(), 1);
    }

    #[tokio::test]
    async fn digital_on_false_fires_only_on_false_level() {
        let e = engine(digital_rule(Some(TriggerCondition::OnFalse)));
        let changed = e.evaluate_point(20, &Value::Bool(true), 1000).await.unwrap();
        assert!(changed.is_empty());
        let changed = e.evaluate_point(20, &Value::Bool(false), 2000).await.unwrap();
        assert_eq!(changed.len(), 1);
    }
}
