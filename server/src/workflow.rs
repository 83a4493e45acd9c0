use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::{
    config::AutoReply,
    error::WorkflowError,
    leads::{LeadService, Recorded},
    notifier::Notifier,
    replies::{menu_reply, text_reply, ReplyContext},
    types::InboundMessage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Skipped,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub recorded: Recorded,
    pub reply: ReplyOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
}

pub struct Workflow {
    leads: LeadService,
    notifier: Option<Arc<dyn Notifier>>,
    auto_reply: AutoReply,
}

impl Workflow {
    pub fn new(
        leads: LeadService,
        notifier: Option<Arc<dyn Notifier>>,
        auto_reply: AutoReply,
    ) -> Self {
        Self {
            leads,
            notifier,
            auto_reply,
        }
    }

    /// Stores one inbound client message and, once it is stored, sends the
    /// configured auto-reply. A failed reply never fails the event.
    pub async fn handle(&self, inbound: &InboundMessage) -> Result<Delivery, WorkflowError> {
        let recorded = self
            .leads
            .record_inbound(&inbound.contact, &inbound.text)
            .await?;
        info!(
            contact = %inbound.contact,
            lead_id = %recorded.lead_id,
            message_id = %recorded.message.id,
            new_lead = recorded.lead_created,
            "inbound message stored"
        );

        let reply = self.reply(inbound, &recorded).await;
        Ok(Delivery { recorded, reply })
    }

    async fn reply(&self, inbound: &InboundMessage, recorded: &Recorded) -> ReplyOutcome {
        let Some(notifier) = &self.notifier else {
            return ReplyOutcome::Skipped;
        };
        let ctx = ReplyContext {
            text: &inbound.text,
            new_conversation: recorded.lead_created,
        };
        let payload = match self.auto_reply {
            AutoReply::Off => return ReplyOutcome::Skipped,
            AutoReply::Text => text_reply(&ctx),
            AutoReply::Menu => menu_reply(&ctx),
        };
        match notifier.send(&inbound.contact, &payload).await {
            Ok(_) => ReplyOutcome::Sent,
            Err(err) => {
                warn!(contact = %inbound.contact, error = %err, "auto-reply failed");
                ReplyOutcome::Failed(err.to_string())
            }
        }
    }

    /// Handles every message of one webhook delivery. Messages from different
    /// contacts run concurrently; one failure does not stop the rest.
    pub async fn handle_batch(&self, inbound: &[InboundMessage]) -> BatchReport {
        let results = join_all(inbound.iter().map(|message| self.handle(message))).await;

        let mut report = BatchReport::default();
        for (message, result) in inbound.iter().zip(results) {
            match result {
                Ok(_) => report.processed += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        contact = %message.contact,
                        platform_message_id = message.platform_message_id.as_deref().unwrap_or(""),
                        timeout = err.is_timeout(),
                        error = %err,
                        "inbound message not stored"
                    );
                }
            }
        }
        report
    }
}
