//! Staff block/unblock commands, validated and applied against the block store.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_BATCH_SLOTS;
use crate::model::*;

/// Caller identity established by the gateway before a command reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedActor {
    pub name: String,
}

impl AuthenticatedActor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Gateway payload: `{ "action": "blockTimeSlot", "data": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AdminCommand {
    BlockFullDay {
        date: CalendarDate,
        #[serde(default)]
        reason: Option<String>,
    },
    UnblockFullDay {
        date: CalendarDate,
    },
    BlockTimeSlot {
        date: CalendarDate,
        slots: Vec<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    UnblockTimeSlot {
        date: CalendarDate,
        slots: Vec<String>,
    },
    SetRecurringBlock {
        /// Caller-chosen id makes a resend idempotent; generated when absent.
        #[serde(default)]
        id: Option<RecurringBlockId>,
        day_of_week: u8,
        start_slot: String,
        end_slot: String,
        until_date: CalendarDate,
        #[serde(default)]
        reason: Option<String>,
    },
    RemoveRecurringBlock {
        id: RecurringBlockId,
    },
}

impl AdminCommand {
    pub fn action(&self) -> &'static str {
        match self {
            AdminCommand::BlockFullDay { .. } => "blockFullDay",
            AdminCommand::UnblockFullDay { .. } => "unblockFullDay",
            AdminCommand::BlockTimeSlot { .. } => "blockTimeSlot",
            AdminCommand::UnblockTimeSlot { .. } => "unblockTimeSlot",
            AdminCommand::SetRecurringBlock { .. } => "setRecurringBlock",
            AdminCommand::RemoveRecurringBlock { .. } => "removeRecurringBlock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TargetStatus {
    Applied,
    /// Already in the requested state, including unblocking something absent.
    Unchanged,
    Rejected { code: &'static str, message: String },
}

impl TargetStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, TargetStatus::Rejected { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TargetStatus::Applied => "applied",
            TargetStatus::Unchanged => "unchanged",
            TargetStatus::Rejected { .. } => "rejected",
        }
    }

    fn rejected(e: &EngineError) -> Self {
        TargetStatus::Rejected {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<MutationOutcome> for TargetStatus {
    fn from(outcome: MutationOutcome) -> Self {
        match outcome {
            MutationOutcome::Applied => TargetStatus::Applied,
            MutationOutcome::Unchanged | MutationOutcome::NotFound => TargetStatus::Unchanged,
        }
    }
}

/// Result for one date, slot label, or recurring block id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetResult {
    pub target: String,
    #[serde(flatten)]
    pub status: TargetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    pub action: &'static str,
    pub results: Vec<TargetResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_block_id: Option<RecurringBlockId>,
}

impl CommandReport {
    fn new(action: &'static str) -> Self {
        Self {
            action,
            results: Vec::new(),
            recurring_block_id: None,
        }
    }

    fn push(&mut self, target: impl Into<String>, status: TargetStatus) {
        self.results.push(TargetResult {
            target: target.into(),
            status,
        });
    }

    pub fn applied(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TargetStatus::Applied)
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status.is_success())
    }
}

/// Validates admin commands and delegates them to the engine's block store.
///
/// Command-wide problems (past date, bad recurring range) fail the whole command.
/// Batch slot commands apply each label on its own; a rejected label does not
/// undo labels already committed. Store failures abort with an error.
pub struct AdminCommandHandler<'a> {
    engine: &'a Engine,
}

impl<'a> AdminCommandHandler<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub async fn handle(
        &self,
        actor: &AuthenticatedActor,
        command: AdminCommand,
    ) -> Result<CommandReport, EngineError> {
        let action = command.action();
        let result = self.dispatch(command).await;
        let status = match &result {
            Ok(report) if report.all_succeeded() => "ok",
            Ok(_) => "partial",
            Err(e) => e.code(),
        };
        metrics::counter!(
            crate::observability::ADMIN_COMMANDS_TOTAL,
            "action" => action,
            "status" => status
        )
        .increment(1);
        match &result {
            Ok(report) => info!(
                actor = %actor.name,
                action,
                applied = report.applied(),
                targets = report.results.len(),
                "admin command"
            ),
            Err(e) => info!(actor = %actor.name, action, error = %e, "admin command rejected"),
        }
        result
    }

    async fn dispatch(&self, command: AdminCommand) -> Result<CommandReport, EngineError> {
        let engine = self.engine;
        let today = engine.today();
        let mut report = CommandReport::new(command.action());

        match command {
            AdminCommand::BlockFullDay { date, reason } => {
                crate::engine::validate_new_block_date(date, today)?;
                let outcome = engine.add_full_day_block(date, reason).await?;
                report.push(date.to_string(), outcome.into());
            }
            AdminCommand::UnblockFullDay { date } => {
                let outcome = engine.remove_full_day_block(date).await?;
                report.push(date.to_string(), outcome.into());
            }
            AdminCommand::BlockTimeSlot { date, slots, reason } => {
                crate::engine::validate_new_block_date(date, today)?;
                check_batch(&slots)?;
                for label in slots {
                    let status = match engine.add_slot_block(date, &label, reason.clone()).await {
                        Ok(outcome) => outcome.into(),
                        Err(e) if e.is_validation() => TargetStatus::rejected(&e),
                        Err(e) => return Err(e),
                    };
                    report.push(label, status);
                }
            }
            AdminCommand::UnblockTimeSlot { date, slots } => {
                check_batch(&slots)?;
                for label in slots {
                    let outcome = engine.remove_slot_block(date, &label).await?;
                    let status = if outcome == MutationOutcome::NotFound
                        && !engine.catalog.contains(date, &label)
                    {
                        TargetStatus::rejected(&EngineError::InvalidSlotLabel {
                            date,
                            label: label.clone(),
                        })
                    } else {
                        outcome.into()
                    };
                    report.push(label, status);
                }
            }
            AdminCommand::SetRecurringBlock {
                id,
                day_of_week,
                start_slot,
                end_slot,
                until_date,
                reason,
            } => {
                if until_date < today {
                    return Err(EngineError::InvalidDate {
                        date: until_date,
                        today,
                    });
                }
                let id = id.unwrap_or_else(Ulid::new);
                let outcome = engine
                    .add_recurring_block(id, day_of_week, &start_slot, &end_slot, until_date, reason)
                    .await?;
                report.recurring_block_id = Some(id);
                report.push(id.to_string(), outcome.into());
            }
            AdminCommand::RemoveRecurringBlock { id } => {
                let outcome = engine.remove_recurring_block(id).await?;
                report.push(id.to_string(), outcome.into());
            }
        }

        for r in report.results.iter().filter(|r| r.status == TargetStatus::Unchanged) {
            debug!("{}: {} already in requested state", report.action, r.target);
        }
        Ok(report)
    }
}

fn check_batch(slots: &[String]) -> Result<(), EngineError> {
    if slots.is_empty() {
        return Err(EngineError::InvalidRange("no slots given".into()));
    }
    if slots.len() > MAX_BATCH_SLOTS {
        return Err(EngineError::LimitExceeded("too many slots in one command"));
    }
    Ok(())
}

impl Engine {
    pub fn admin(&self) -> AdminCommandHandler<'_> {
        AdminCommandHandler::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_payloads() {
        let cmd: AdminCommand = serde_json::from_str(
            r#"{"action":"blockTimeSlot","data":{"date":"2030-01-05","slots":["11:00 AM","11:30 AM"]}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            AdminCommand::BlockTimeSlot {
                date: "2030-01-05".parse().unwrap(),
                slots: vec!["11:00 AM".into(), "11:30 AM".into()],
                reason: None,
            }
        );

        let cmd: AdminCommand = serde_json::from_str(
            r#"{"action":"setRecurringBlock","data":{"dayOfWeek":1,"startSlot":"6:30 PM","endSlot":"8:00 PM","untilDate":"2030-03-31","reason":"Class"}}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            AdminCommand::SetRecurringBlock { day_of_week: 1, id: None, .. }
        ));

        let cmd: AdminCommand =
            serde_json::from_str(r#"{"action":"unblockFullDay","data":{"date":"2030-01-05"}}"#).unwrap();
        assert_eq!(cmd.action(), "unblockFullDay");
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = serde_json::from_str::<AdminCommand>(
            r#"{"action":"blockTimeSlot","data":{"date":"2030-01-05"}}"#,
        );
        assert!(err.is_err());
        let err = serde_json::from_str::<AdminCommand>(r#"{"action":"dropTables","data":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn report_serializes_per_target_status() {
        let mut report = CommandReport::new("blockTimeSlot");
        report.push("11:00 AM", TargetStatus::Applied);
        report.push(
            "3:15 AM",
            TargetStatus::Rejected {
                code: "InvalidSlotLabel",
                message: "nope".into(),
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["status"], "applied");
        assert_eq!(json["results"][1]["code"], "InvalidSlotLabel");
        assert!(json.get("recurring_block_id").is_none());
        assert_eq!(report.applied(), 1);
        assert!(!report.all_succeeded());
    }
}
