//! The deterministic rules engine: message patterns mapped to
//! `(tool_name, input)` pairs, represented as data rather than branching
//! code, mirroring the teacher's `JobRegistry` data-driven dispatch table
//! (keyed there by job type string; keyed here by keyword match).

use serde_json::{json, Value};

/// What a rule's extractor sees: the raw request text and whatever
/// structured hints the caller attached. Context carries the fields a
/// message alone can't express — a lead id, a phone number, an amount —
/// the same way a chat UI would pass form fields alongside free text.
#[derive(Debug, Clone)]
pub struct PlannerRequest {
    pub message: String,
    pub context: Value,
}

impl PlannerRequest {
    pub fn new(message: impl Into<String>, context: Value) -> Self {
        Self {
            message: message.into(),
            context,
        }
    }

    fn context_str(&self, field: &str) -> Option<&str> {
        self.context.get(field).and_then(Value::as_str)
    }
}

/// A single entry in the rule set: a keyword pattern, the tool it compiles
/// to, an input-builder, and an explicit ordinal so enqueue order is
/// deterministic rather than an artifact of `Vec` insertion order (§4.4).
pub struct PlannerRule {
    pub name: &'static str,
    /// All of these substrings must appear (case-insensitively) in the
    /// message for this rule to match.
    pub keywords: &'static [&'static str],
    pub tool_name: &'static str,
    pub order: u32,
    pub build_input: fn(&PlannerRequest) -> Value,
}

impl PlannerRule {
    fn matches(&self, message_lower: &str) -> bool {
        self.keywords.iter().all(|kw| message_lower.contains(kw))
    }
}

/// The registered set of rules, consulted in ascending `order`. First match
/// wins — a single request compiles to one tool call; callers needing a
/// sequence of dependent calls issue them as separate requests (§4.4: the
/// core substrate does not model cross-call dependencies).
pub struct RuleSet {
    rules: Vec<PlannerRule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<PlannerRule>) -> Self {
        rules.sort_by_key(|r| r.order);
        Self { rules }
    }

    /// The rule set this platform ships with. A fresh `RuleSet` can be
    /// built instead in tests or a future domain that needs different
    /// routing, but the default rules are what `fieldops-daemon` loads.
    pub fn default_rules() -> Self {
        Self::new(vec![
            PlannerRule {
                name: "create_task",
                keywords: &["task"],
                tool_name: "os.create_task",
                order: 10,
                build_input: build_create_task_input,
            },
            PlannerRule {
                name: "create_lead",
                keywords: &["lead"],
                tool_name: "leads.create",
                order: 20,
                build_input: build_create_lead_input,
            },
            PlannerRule {
                name: "schedule_inspection",
                keywords: &["inspection"],
                tool_name: "inspections.schedule",
                order: 30,
                build_input: build_schedule_inspection_input,
            },
            PlannerRule {
                name: "create_quote",
                keywords: &["quote"],
                tool_name: "quotes.create",
                order: 40,
                build_input: build_create_quote_input,
            },
            PlannerRule {
                name: "send_sms",
                keywords: &["sms"],
                tool_name: "comms.send_sms",
                order: 50,
                build_input: build_send_sms_input,
            },
        ])
    }

    /// The first rule (by `order`) whose keywords all appear in `message`.
    pub fn find_match<'a>(&'a self, message: &str) -> Option<&'a PlannerRule> {
        let lower = message.to_lowercase();
        self.rules.iter().find(|rule| rule.matches(&lower))
    }
}

/// `"create task: call John"` → `title = "call John"`. Falls back to the
/// whole message, trimmed, if there's no colon to split on.
fn build_create_task_input(req: &PlannerRequest) -> Value {
    let title = match req.message.split_once(':') {
        Some((_, rest)) => rest.trim().to_string(),
        None => req.message.trim().to_string(),
    };
    let mut input = json!({ "title": title });
    if let Some(domain) = req.context_str("domain") {
        input["domain"] = json!(domain);
    }
    if let Some(lead_id) = req.context_str("lead_id") {
        input["lead_id"] = json!(lead_id);
    }
    input
}

/// Lead fields come from `context`, not the free-text message — a phone
/// number isn't reliably extractable from prose.
fn build_create_lead_input(req: &PlannerRequest) -> Value {
    let mut input = json!({});
    for field in ["name", "phone", "suburb", "source"] {
        if let Some(value) = req.context_str(field) {
            input[field] = json!(value);
        }
    }
    input
}

fn build_schedule_inspection_input(req: &PlannerRequest) -> Value {
    let mut input = json!({});
    for field in ["lead_id", "scheduled_at", "notes"] {
        if let Some(value) = req.context_str(field) {
            input[field] = json!(value);
        }
    }
    input
}

fn build_create_quote_input(req: &PlannerRequest) -> Value {
    let mut input = json!({});
    if let Some(lead_id) = req.context_str("lead_id") {
        input["lead_id"] = json!(lead_id);
    }
    if let Some(amount) = req.context.get("amount_cents").and_then(Value::as_i64) {
        input["amount_cents"] = json!(amount);
    }
    if let Some(currency) = req.context_str("currency") {
        input["currency"] = json!(currency);
    }
    input
}

fn build_send_sms_input(req: &PlannerRequest) -> Value {
    let mut input = json!({});
    if let Some(to) = req.context_str("to") {
        input["to"] = json!(to);
    }
    let message = req
        .context_str("message")
        .map(|s| s.to_string())
        .unwrap_or_else(|| req.message.clone());
    input["message"] = json!(message);
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_create_task_and_extracts_title_after_colon() {
        let rules = RuleSet::default_rules();
        let req = PlannerRequest::new("create task: call John", json!({}));
        let rule = rules.find_match(&req.message).unwrap();
        assert_eq!(rule.tool_name, "os.create_task");
        let input = (rule.build_input)(&req);
        assert_eq!(input["title"], "call John");
    }

    #[test]
    fn no_rule_matches_unrelated_message() {
        let rules = RuleSet::default_rules();
        assert!(rules.find_match("what is the weather today").is_none());
    }

    #[test]
    fn send_sms_rule_prefers_context_message_over_raw_text() {
        let rules = RuleSet::default_rules();
        let req = PlannerRequest::new(
            "send an sms please",
            json!({"to": "+61400000002", "message": "hi"}),
        );
        let rule = rules.find_match(&req.message).unwrap();
        assert_eq!(rule.tool_name, "comms.send_sms");
        let input = (rule.build_input)(&req);
        assert_eq!(input["to"], "+61400000002");
        assert_eq!(input["message"], "hi");
    }
}
