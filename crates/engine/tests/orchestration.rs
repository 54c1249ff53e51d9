//! Orchestration scenarios against the in-memory repository.
//!
//! Every external capability is a scripted fake, so these run without any
//! infrastructure:
//!
//! ```bash
//! cargo test -p herald-engine --test orchestration
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use herald_common::request::{
    AttachmentDeliveryMode, LetterAttachment, LetterRequest, MessageRequest, MessageSender,
    Request, SlackRequest, SmsRequest,
};
use herald_common::types::{Address, Attribution, Channel, Delivery, DeliveryStatus};
use herald_engine::batch::BatchClosure;
use herald_engine::capability::{
    AddressResolver, Capabilities, CapabilityError, ChannelSender, ContactPreference,
    ContactResolver, PrintBatchVendor, SendContext,
};
use herald_engine::dispatch::{DispatchQueue, DispatchTrigger, MemoryQueue, WorkerPool};
use herald_engine::error::EngineError;
use herald_engine::intake::{Intake, LetterBatchRequest};
use herald_engine::orchestrator::{Orchestrator, RoutingDefaults};
use herald_engine::repository::{Claim, DeliveryRepository, MemoryDeliveryRepository};
use herald_engine::status::StatusService;

const MUNICIPALITY: &str = "2281";

// ============================================================
// Scripted capabilities
// ============================================================

/// Sender answering attempts with a scripted verdict, optionally a
/// different one for specific parties.
struct ScriptedSender {
    channel: Channel,
    verdict: Result<DeliveryStatus, String>,
    party_verdicts: HashMap<Uuid, Result<DeliveryStatus, String>>,
    delay: Duration,
    calls: Mutex<Vec<(SendContext, Request)>>,
}

impl ScriptedSender {
    fn scripted(
        channel: Channel,
        verdict: Result<DeliveryStatus, String>,
        party_verdicts: HashMap<Uuid, Result<DeliveryStatus, String>>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            verdict,
            party_verdicts,
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn new(channel: Channel, verdict: Result<DeliveryStatus, String>) -> Arc<Self> {
        Self::scripted(channel, verdict, HashMap::new(), Duration::ZERO)
    }

    fn sent(channel: Channel) -> Arc<Self> {
        Self::new(channel, Ok(DeliveryStatus::Sent))
    }

    fn failing(channel: Channel) -> Arc<Self> {
        Self::new(channel, Err("mailbox unreachable".to_string()))
    }

    /// Sends successfully except to `party_id`.
    fn failing_for(channel: Channel, party_id: Uuid) -> Arc<Self> {
        let overrides = HashMap::from([(party_id, Err("mailbox unreachable".to_string()))]);
        Self::scripted(channel, Ok(DeliveryStatus::Sent), overrides, Duration::ZERO)
    }

    /// Sends successfully, but only after `delay`.
    fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
        Self::scripted(channel, Ok(DeliveryStatus::Sent), HashMap::new(), delay)
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        ctx: &SendContext,
        request: &Request,
    ) -> Result<DeliveryStatus, CapabilityError> {
        self.calls.lock().await.push((ctx.clone(), request.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        ctx.party_id
            .and_then(|party_id| self.party_verdicts.get(&party_id))
            .unwrap_or(&self.verdict)
            .clone()
            .map_err(CapabilityError::Rejected)
    }
}

struct FixedContacts {
    preferences: Result<Vec<ContactPreference>, String>,
    calls: AtomicUsize,
}

impl FixedContacts {
    fn new(preferences: Vec<ContactPreference>) -> Arc<Self> {
        Arc::new(Self {
            preferences: Ok(preferences),
            calls: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            preferences: Err("connection refused".to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ContactResolver for FixedContacts {
    async fn resolve(
        &self,
        _municipality_id: &str,
        _party_id: Uuid,
        _filters: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<ContactPreference>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.preferences
            .clone()
            .map_err(CapabilityError::Transport)
    }
}

struct FixedAddresses {
    address: Option<Address>,
}

#[async_trait]
impl AddressResolver for FixedAddresses {
    async fn resolve(
        &self,
        _municipality_id: &str,
        party_id: Uuid,
    ) -> Result<Address, CapabilityError> {
        self.address
            .clone()
            .ok_or_else(|| CapabilityError::NotFound(format!("party {}", party_id)))
    }
}

#[derive(Default)]
struct RecordingVendor {
    submissions: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl PrintBatchVendor for RecordingVendor {
    async fn submit_batch(
        &self,
        _municipality_id: &str,
        batch_id: Uuid,
    ) -> Result<(), CapabilityError> {
        self.submissions.lock().await.push(batch_id);
        Ok(())
    }
}

// ============================================================
// Shared helpers
// ============================================================

struct Harness {
    repo: Arc<MemoryDeliveryRepository>,
    vendor: Arc<RecordingVendor>,
    contacts: Arc<FixedContacts>,
    senders: HashMap<Channel, Arc<ScriptedSender>>,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    fn build(
        contacts: Arc<FixedContacts>,
        address: Option<Address>,
        senders: Vec<Arc<ScriptedSender>>,
    ) -> Self {
        let repo = Arc::new(MemoryDeliveryRepository::new());
        let vendor = Arc::new(RecordingVendor::default());

        let mut capabilities = Capabilities::new(
            contacts.clone(),
            Arc::new(FixedAddresses { address }),
            vendor.clone(),
        );
        for sender in &senders {
            capabilities = capabilities.with_sender(sender.clone());
        }

        let orchestrator = Arc::new(Orchestrator::new(
            repo.clone(),
            capabilities,
            RoutingDefaults::default(),
        ));

        Self {
            repo,
            vendor,
            contacts,
            senders: senders.into_iter().map(|s| (s.channel, s)).collect(),
            orchestrator,
        }
    }

    /// Every physical channel sends successfully.
    fn all_sent(contacts: Arc<FixedContacts>) -> Self {
        Self::build(
            contacts,
            Some(address()),
            vec![
                ScriptedSender::sent(Channel::Email),
                ScriptedSender::sent(Channel::Sms),
                ScriptedSender::sent(Channel::DigitalMail),
                ScriptedSender::sent(Channel::SnailMail),
            ],
        )
    }

    async fn calls(&self, channel: Channel) -> usize {
        match self.senders.get(&channel) {
            Some(sender) => sender.call_count().await,
            None => 0,
        }
    }

    async fn pending(&self, request: Request, batch_id: Option<Uuid>) -> Delivery {
        let delivery = Delivery::new(
            MUNICIPALITY,
            Uuid::new_v4(),
            batch_id,
            &request,
            &Attribution {
                origin: Some("test-suite".to_string()),
                issuer: Some("tester".to_string()),
            },
        )
        .unwrap();
        self.repo.insert_all(std::slice::from_ref(&delivery)).await.unwrap();
        delivery
    }
}

fn address() -> Address {
    Address {
        first_name: Some("Kalle".to_string()),
        last_name: Some("Anka".to_string()),
        care_of: None,
        street: "Storgatan 1".to_string(),
        apartment_number: None,
        zip_code: "85230".to_string(),
        city: "Sundsvall".to_string(),
        country: Some("Sweden".to_string()),
    }
}

fn preference(channel: &str, destination: Option<&str>) -> ContactPreference {
    ContactPreference {
        channel: channel.to_string(),
        destination: destination.map(str::to_string),
        enabled: true,
    }
}

fn message(party_id: Uuid) -> Request {
    Request::Message(MessageRequest {
        party_id,
        filters: BTreeMap::new(),
        sender: MessageSender::default(),
        subject: Some("Reminder".to_string()),
        message: "Your permit expires soon".to_string(),
        html_message: None,
    })
}

fn letter_attachment(mode: AttachmentDeliveryMode, name: &str) -> LetterAttachment {
    LetterAttachment {
        delivery_mode: mode,
        name: name.to_string(),
        content_type: "application/pdf".to_string(),
        content: "aGVsbG8=".to_string(),
    }
}

fn letter(
    party_id: Option<Uuid>,
    address: Option<Address>,
    attachments: Vec<LetterAttachment>,
) -> Request {
    Request::Letter(LetterRequest {
        party_id,
        address,
        organization_number: None,
        subject: Some("Decision".to_string()),
        sender: None,
        content_type: "text/plain".to_string(),
        body: "Your application has been approved".to_string(),
        department: Some("Planning".to_string()),
        deviation: None,
        attachments,
    })
}

fn sms() -> Request {
    Request::Sms(SmsRequest {
        party_id: None,
        sender: "Herald".to_string(),
        mobile_number: "+46701234567".to_string(),
        message: "Hello".to_string(),
    })
}

// ============================================================
// Direct channels
// ============================================================

#[tokio::test]
async fn test_direct_channel_is_sent_and_archived() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let delivery = h.pending(sms(), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    let record = &outcome.archived[0];
    assert_eq!(record.delivery_id, delivery.delivery_id);
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.channel, Channel::Sms);
    assert_eq!(record.origin.as_deref(), Some("test-suite"));
    assert!(outcome.batch.is_none());
    assert_eq!(h.repo.pending_count().await, 0);
    assert_eq!(h.calls(Channel::Sms).await, 1);
}

#[tokio::test]
async fn test_sender_error_is_archived_as_failed() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        None,
        vec![ScriptedSender::failing(Channel::Sms)],
    );
    let delivery = h.pending(sms(), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    let record = &outcome.archived[0];
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert!(record.status_detail.as_deref().unwrap().contains("mailbox unreachable"));
    assert_eq!(h.repo.pending_count().await, 0);
}

#[tokio::test]
async fn test_non_terminal_sender_verdict_is_failed() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        None,
        vec![ScriptedSender::new(Channel::Sms, Ok(DeliveryStatus::Pending))],
    );
    let delivery = h.pending(sms(), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived[0].status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn test_unsupported_channel_fails_loudly() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let slack = Request::Slack(SlackRequest {
        token: "xoxb-token".to_string(),
        channel: "#ops".to_string(),
        message: "Deploy done".to_string(),
    });
    let delivery = h.pending(slack, None).await;

    let result = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await;

    assert!(matches!(result, Err(EngineError::UnsupportedChannel(Channel::Slack))));
    let history = h.repo.all_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Failed);
    assert!(history[0].status_detail.as_deref().unwrap().contains("SLACK"));
    assert_eq!(h.repo.pending_count().await, 0);
}

#[tokio::test]
async fn test_unreadable_content_is_archived_as_failed() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let mut delivery = Delivery::new(MUNICIPALITY, Uuid::new_v4(), None, &sms(), &Attribution::default())
        .unwrap();
    delivery.content = serde_json::json!({ "messageType": "SMS", "mobileNumber": 12 });
    h.repo.insert_all(std::slice::from_ref(&delivery)).await.unwrap();

    let result = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await;

    assert!(matches!(result, Err(EngineError::Reconstruction(_))));
    let history = h.repo.all_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Failed);
    assert!(
        history[0]
            .status_detail
            .as_deref()
            .unwrap()
            .starts_with("Unable to reconstruct request")
    );
    assert_eq!(h.calls(Channel::Sms).await, 0);
}

#[tokio::test]
async fn test_second_trigger_is_a_no_op() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let delivery = h.pending(sms(), None).await;

    h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();
    let again = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await;

    assert!(matches!(again, Err(EngineError::DeliveryNotFound(id)) if id == delivery.delivery_id));
    assert_eq!(h.repo.all_history().await.len(), 1);
    assert_eq!(h.calls(Channel::Sms).await, 1);
}

// ============================================================
// Generic messages
// ============================================================

#[tokio::test]
async fn test_message_without_contact_settings() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let delivery = h.pending(message(Uuid::new_v4()), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    let record = &outcome.archived[0];
    assert_eq!(record.delivery_id, delivery.delivery_id);
    assert_eq!(record.status, DeliveryStatus::NoContactSettingsFound);
    assert_eq!(record.channel, Channel::Message);
    assert_eq!(h.calls(Channel::Email).await, 0);
    assert_eq!(h.calls(Channel::Sms).await, 0);
    assert_eq!(h.contacts.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_message_fans_out_per_contact_setting() {
    let h = Harness::all_sent(FixedContacts::new(vec![
        preference("EMAIL", Some("kalle@example.org")),
        preference("SMS", Some("+46701234567")),
    ]));
    let delivery = h.pending(message(Uuid::new_v4()), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 2);
    let (email, sms) = (&outcome.archived[0], &outcome.archived[1]);

    assert_eq!(email.message_id, delivery.message_id);
    assert_eq!(sms.message_id, delivery.message_id);
    assert_ne!(email.delivery_id, sms.delivery_id);
    assert_eq!(email.delivery_id, delivery.delivery_id);

    assert_eq!(email.channel, Channel::Email);
    assert_eq!(sms.channel, Channel::Sms);
    assert_eq!(email.original_channel, Channel::Message);
    assert_eq!(sms.original_channel, Channel::Message);
    assert!(outcome.archived.iter().all(|r| r.status == DeliveryStatus::Sent));

    assert_eq!(h.calls(Channel::Email).await, 1);
    assert_eq!(h.calls(Channel::Sms).await, 1);
    assert_eq!(h.repo.pending_count().await, 0);
}

#[tokio::test]
async fn test_message_unusable_settings_are_concluded() {
    let h = Harness::all_sent(FixedContacts::new(vec![
        preference("NO_CONTACT", None),
        preference("FAX", Some("0601-123456")),
    ]));
    let delivery = h.pending(message(Uuid::new_v4()), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    let statuses: Vec<DeliveryStatus> = outcome.archived.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![DeliveryStatus::NoContactWanted, DeliveryStatus::Failed]
    );
    assert!(
        outcome.archived[1]
            .status_detail
            .as_deref()
            .unwrap()
            .contains("FAX")
    );
    assert_ne!(outcome.archived[0].delivery_id, outcome.archived[1].delivery_id);
}

#[tokio::test]
async fn test_settled_branches_are_never_pending() {
    let h = Harness::build(
        FixedContacts::new(vec![
            preference("NO_CONTACT", None),
            preference("EMAIL", Some("kalle@example.org")),
            preference("FAX", Some("0601-123456")),
        ]),
        None,
        vec![ScriptedSender::slow(Channel::Email, Duration::from_millis(200))],
    );
    let delivery = h.pending(message(Uuid::new_v4()), None).await;

    let orchestrator = h.orchestrator.clone();
    let delivery_id = delivery.delivery_id;
    let running = tokio::spawn(async move { orchestrator.resolve_and_deliver(delivery_id).await });

    // While the e-mail is in flight only its own row is pending, and it is
    // claimed, so recovery has nothing to re-run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pending = h.repo.pending_by_message(delivery.message_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].channel, Channel::Email);
    assert!(h.repo.unclaimed_ids().await.unwrap().is_empty());
    let statuses: Vec<DeliveryStatus> = h.repo.all_history().await.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![DeliveryStatus::NoContactWanted, DeliveryStatus::Failed]);

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.archived.len(), 3);
    assert_eq!(h.repo.pending_count().await, 0);
    assert_eq!(h.contacts.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_message_contact_lookup_failure() {
    let h = Harness::all_sent(FixedContacts::unavailable());
    let delivery = h.pending(message(Uuid::new_v4()), None).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    assert_eq!(outcome.archived[0].status, DeliveryStatus::Failed);
    assert!(
        outcome.archived[0]
            .status_detail
            .as_deref()
            .unwrap()
            .starts_with("Contact settings lookup failed")
    );
}

// ============================================================
// Letters and print batches
// ============================================================

#[tokio::test]
async fn test_letter_delivered_digitally() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let batch_id = Uuid::new_v4();
    let request = letter(
        Some(Uuid::new_v4()),
        None,
        vec![letter_attachment(AttachmentDeliveryMode::Any, "decision.pdf")],
    );
    let delivery = h.pending(request, Some(batch_id)).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    assert_eq!(outcome.archived[0].channel, Channel::DigitalMail);
    assert_eq!(outcome.archived[0].original_channel, Channel::Letter);
    assert_eq!(outcome.archived[0].status, DeliveryStatus::Sent);
    assert_eq!(outcome.batch, Some(BatchClosure::NothingToPrint));
    assert_eq!(h.calls(Channel::SnailMail).await, 0);
    assert!(h.vendor.submissions.lock().await.is_empty());
}

#[tokio::test]
async fn test_letter_digital_only_attachment_has_no_fallback() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        Some(address()),
        vec![
            ScriptedSender::failing(Channel::DigitalMail),
            ScriptedSender::sent(Channel::SnailMail),
        ],
    );
    let request = letter(
        Some(Uuid::new_v4()),
        None,
        vec![letter_attachment(AttachmentDeliveryMode::DigitalMail, "decision.pdf")],
    );
    let delivery = h.pending(request, Some(Uuid::new_v4())).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    assert_eq!(outcome.archived[0].channel, Channel::DigitalMail);
    assert_eq!(outcome.archived[0].status, DeliveryStatus::Failed);
    assert!(
        h.repo
            .all_history()
            .await
            .iter()
            .all(|r| r.channel != Channel::SnailMail)
    );
    assert_eq!(h.calls(Channel::SnailMail).await, 0);
    assert_eq!(outcome.batch, Some(BatchClosure::NothingToPrint));
}

#[tokio::test]
async fn test_letter_falls_back_to_snail_mail() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        Some(address()),
        vec![
            ScriptedSender::failing(Channel::DigitalMail),
            ScriptedSender::sent(Channel::SnailMail),
        ],
    );
    let batch_id = Uuid::new_v4();
    let request = letter(
        Some(Uuid::new_v4()),
        None,
        vec![
            letter_attachment(AttachmentDeliveryMode::Any, "decision.pdf"),
            letter_attachment(AttachmentDeliveryMode::DigitalMail, "receipt.pdf"),
        ],
    );
    let delivery = h.pending(request, Some(batch_id)).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 2);
    let (digital, snail) = (&outcome.archived[0], &outcome.archived[1]);
    assert_eq!(digital.channel, Channel::DigitalMail);
    assert_eq!(digital.status, DeliveryStatus::Failed);
    assert_eq!(digital.delivery_id, delivery.delivery_id);
    assert_eq!(snail.channel, Channel::SnailMail);
    assert_eq!(snail.status, DeliveryStatus::Sent);
    assert_ne!(snail.delivery_id, digital.delivery_id);
    assert_eq!(snail.message_id, digital.message_id);

    // Only the ANY attachment is printable.
    let calls = h.senders[&Channel::SnailMail].calls.lock().await;
    match &calls[0].1 {
        Request::SnailMail(r) => {
            assert_eq!(r.attachments.len(), 1);
            assert_eq!(r.attachments[0].name, "decision.pdf");
            assert_eq!(r.address.as_ref().map(|a| a.city.as_str()), Some("Sundsvall"));
        }
        other => panic!("expected snail mail, got {:?}", other),
    }

    assert_eq!(outcome.batch, Some(BatchClosure::Submitted));
    assert_eq!(*h.vendor.submissions.lock().await, vec![batch_id]);
}

#[tokio::test]
async fn test_party_letter_without_digital_attachments_prints_as_new_attempt() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let batch_id = Uuid::new_v4();
    let request = letter(
        Some(Uuid::new_v4()),
        None,
        vec![letter_attachment(AttachmentDeliveryMode::SnailMail, "decision.pdf")],
    );
    let delivery = h.pending(request, Some(batch_id)).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    let snail = &outcome.archived[0];
    assert_eq!(snail.channel, Channel::SnailMail);
    assert_eq!(snail.original_channel, Channel::Letter);
    assert_eq!(snail.status, DeliveryStatus::Sent);
    assert_ne!(snail.delivery_id, delivery.delivery_id);
    assert_eq!(snail.message_id, delivery.message_id);
    assert_eq!(h.calls(Channel::DigitalMail).await, 0);
    assert_eq!(h.calls(Channel::SnailMail).await, 1);
    assert_eq!(h.repo.pending_count().await, 0);
    assert_eq!(outcome.batch, Some(BatchClosure::Submitted));
    assert_eq!(*h.vendor.submissions.lock().await, vec![batch_id]);
}

#[tokio::test]
async fn test_mixed_letter_batch_is_submitted_once() {
    let (digital_party, fallback_party) = (Uuid::new_v4(), Uuid::new_v4());
    let h = Harness::build(
        FixedContacts::new(vec![]),
        Some(address()),
        vec![
            ScriptedSender::failing_for(Channel::DigitalMail, fallback_party),
            ScriptedSender::sent(Channel::SnailMail),
        ],
    );
    let batch_id = Uuid::new_v4();
    let attachments = vec![letter_attachment(AttachmentDeliveryMode::Any, "decision.pdf")];
    let first = h
        .pending(letter(Some(digital_party), None, attachments.clone()), Some(batch_id))
        .await;
    let second = h
        .pending(letter(Some(fallback_party), None, attachments), Some(batch_id))
        .await;

    let first_outcome = h.orchestrator.resolve_and_deliver(first.delivery_id).await.unwrap();
    assert_eq!(first_outcome.archived.len(), 1);
    assert_eq!(first_outcome.archived[0].channel, Channel::DigitalMail);
    assert_eq!(first_outcome.archived[0].status, DeliveryStatus::Sent);
    assert_eq!(first_outcome.batch, Some(BatchClosure::Open));
    assert!(h.vendor.submissions.lock().await.is_empty());

    let second_outcome = h.orchestrator.resolve_and_deliver(second.delivery_id).await.unwrap();
    let channels: Vec<(Channel, DeliveryStatus)> = second_outcome
        .archived
        .iter()
        .map(|r| (r.channel, r.status))
        .collect();
    assert_eq!(
        channels,
        vec![
            (Channel::DigitalMail, DeliveryStatus::Failed),
            (Channel::SnailMail, DeliveryStatus::Sent),
        ]
    );
    assert_eq!(second_outcome.batch, Some(BatchClosure::Submitted));

    let history = h.repo.all_history().await;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.batch_id == Some(batch_id)));
    assert_eq!(h.calls(Channel::DigitalMail).await, 2);
    assert_eq!(h.calls(Channel::SnailMail).await, 1);
    assert_eq!(*h.vendor.submissions.lock().await, vec![batch_id]);
}

#[tokio::test]
async fn test_letter_to_address_goes_straight_to_print() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let request = letter(
        None,
        Some(address()),
        vec![letter_attachment(AttachmentDeliveryMode::SnailMail, "decision.pdf")],
    );
    let delivery = h.pending(request, Some(Uuid::new_v4())).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    assert_eq!(outcome.archived[0].delivery_id, delivery.delivery_id);
    assert_eq!(outcome.archived[0].channel, Channel::SnailMail);
    assert_eq!(h.calls(Channel::DigitalMail).await, 0);
    assert_eq!(outcome.batch, Some(BatchClosure::Submitted));
}

#[tokio::test]
async fn test_letter_address_lookup_failure() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        None,
        vec![ScriptedSender::sent(Channel::SnailMail)],
    );
    let request = letter(
        Some(Uuid::new_v4()),
        None,
        vec![letter_attachment(AttachmentDeliveryMode::SnailMail, "decision.pdf")],
    );
    let delivery = h.pending(request, Some(Uuid::new_v4())).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    let record = &outcome.archived[0];
    assert_eq!(record.channel, Channel::SnailMail);
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert!(record.status_detail.as_deref().unwrap().starts_with("Address lookup failed"));
    assert_eq!(h.calls(Channel::SnailMail).await, 0);
    assert_eq!(outcome.batch, Some(BatchClosure::AllPrintFailed));
    assert!(h.vendor.submissions.lock().await.is_empty());
}

#[tokio::test]
async fn test_letter_without_eligible_attachments() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let request = letter(None, Some(address()), vec![]);
    let delivery = h.pending(request, Some(Uuid::new_v4())).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    assert_eq!(outcome.archived[0].channel, Channel::Letter);
    assert_eq!(outcome.archived[0].status, DeliveryStatus::Failed);
    assert_eq!(h.calls(Channel::SnailMail).await, 0);
}

#[tokio::test]
async fn test_batch_is_submitted_once_when_last_letter_closes() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let batch_id = Uuid::new_v4();
    let attachments = vec![letter_attachment(AttachmentDeliveryMode::SnailMail, "decision.pdf")];
    let first = h
        .pending(letter(None, Some(address()), attachments.clone()), Some(batch_id))
        .await;
    let second = h
        .pending(letter(None, Some(address()), attachments), Some(batch_id))
        .await;

    let first_outcome = h.orchestrator.resolve_and_deliver(first.delivery_id).await.unwrap();
    assert_eq!(first_outcome.batch, Some(BatchClosure::Open));
    assert!(h.vendor.submissions.lock().await.is_empty());

    let second_outcome = h.orchestrator.resolve_and_deliver(second.delivery_id).await.unwrap();
    assert_eq!(second_outcome.batch, Some(BatchClosure::Submitted));
    assert_eq!(*h.vendor.submissions.lock().await, vec![batch_id]);
}

#[tokio::test]
async fn test_batch_with_only_failed_snail_mail_is_not_submitted() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        Some(address()),
        vec![ScriptedSender::failing(Channel::SnailMail)],
    );
    let request = letter(
        None,
        Some(address()),
        vec![letter_attachment(AttachmentDeliveryMode::Any, "decision.pdf")],
    );
    let delivery = h.pending(request, Some(Uuid::new_v4())).await;

    let outcome = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    assert_eq!(outcome.batch, Some(BatchClosure::AllPrintFailed));
    assert!(h.vendor.submissions.lock().await.is_empty());
}

// ============================================================
// Intake, dispatch and status
// ============================================================

#[tokio::test]
async fn test_intake_and_worker_pool_end_to_end() {
    let h = Harness::all_sent(FixedContacts::new(vec![preference(
        "EMAIL",
        Some("kalle@example.org"),
    )]));
    let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::new());
    let intake = Intake::new(h.repo.clone(), DispatchTrigger::new(queue.clone()));

    let letters = LetterBatchRequest {
        party_ids: vec![Uuid::new_v4()],
        addresses: vec![address()],
        organization_number: None,
        subject: Some("Decision".to_string()),
        sender: None,
        content_type: "text/plain".to_string(),
        body: "Approved".to_string(),
        department: None,
        deviation: None,
        attachments: vec![letter_attachment(AttachmentDeliveryMode::Any, "decision.pdf")],
    };
    let attribution = Attribution::default();
    let batch = intake.create_letter(MUNICIPALITY, letters, &attribution).await.unwrap();
    let single = intake
        .create_delivery(MUNICIPALITY, message(Uuid::new_v4()), None, &attribution)
        .await
        .unwrap();
    assert_eq!(batch.messages.len(), 2);
    assert!(single.batch_id.is_none());

    let pool = Arc::new(
        WorkerPool::new(queue, h.orchestrator.clone(), 1).with_poll_timeout(Duration::from_millis(20)),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run(shutdown_rx).await })
    };

    let mut waited = 0;
    while h.repo.pending_count().await > 0 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap().unwrap();

    assert_eq!(h.repo.pending_count().await, 0);
    let history = h.repo.all_history().await;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.status == DeliveryStatus::Sent));
    assert_eq!(*h.vendor.submissions.lock().await, vec![batch.batch_id]);
}

#[tokio::test]
async fn test_recover_re_enqueues_pending_deliveries() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let first = h.pending(sms(), None).await;
    let second = h.pending(sms(), None).await;

    let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::new());
    let pool = WorkerPool::new(queue.clone(), h.orchestrator.clone(), 1);

    assert_eq!(pool.recover(h.repo.as_ref()).await.unwrap(), 2);

    let mut popped = vec![
        queue.pop(Duration::from_millis(10)).await.unwrap().unwrap(),
        queue.pop(Duration::from_millis(10)).await.unwrap().unwrap(),
    ];
    popped.sort();
    let mut expected = vec![first.delivery_id, second.delivery_id];
    expected.sort();
    assert_eq!(popped, expected);
}

#[tokio::test]
async fn test_duplicate_trigger_is_delivered_once() {
    let h = Harness::build(
        FixedContacts::new(vec![]),
        None,
        vec![ScriptedSender::slow(Channel::Sms, Duration::from_millis(100))],
    );
    let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::new());
    let intake = Intake::new(h.repo.clone(), DispatchTrigger::new(queue.clone()));
    let receipt = intake
        .create_delivery(MUNICIPALITY, sms(), None, &Attribution::default())
        .await
        .unwrap();

    let pool = Arc::new(
        WorkerPool::new(queue, h.orchestrator.clone(), 4).with_poll_timeout(Duration::from_millis(20)),
    );
    // A restart while the original trigger is still queued.
    assert_eq!(pool.recover(h.repo.as_ref()).await.unwrap(), 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run(shutdown_rx).await })
    };

    let mut waited = 0;
    while h.repo.pending_count().await > 0 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    // Let the second trigger run to completion too.
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap().unwrap();

    assert_eq!(h.calls(Channel::Sms).await, 1);
    let history = h.repo.all_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].delivery_id, receipt.delivery_id);
}

#[tokio::test]
async fn test_claimed_delivery_is_left_to_its_owner() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let delivery = h.pending(sms(), None).await;
    let claim = h
        .repo
        .claim(delivery.delivery_id, Duration::from_secs(300))
        .await
        .unwrap();
    assert!(matches!(claim, Claim::Claimed(_)));

    let result = h.orchestrator.resolve_and_deliver(delivery.delivery_id).await;

    assert!(matches!(result, Err(EngineError::AlreadyClaimed(id)) if id == delivery.delivery_id));
    assert_eq!(h.calls(Channel::Sms).await, 0);
    assert_eq!(h.repo.pending_count().await, 1);
    assert!(h.repo.all_history().await.is_empty());
}

#[tokio::test]
async fn test_expired_claim_can_be_taken_over() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let delivery = h.pending(sms(), None).await;
    h.repo
        .claim(delivery.delivery_id, Duration::from_secs(300))
        .await
        .unwrap();

    assert!(h.repo.unclaimed_ids().await.unwrap().is_empty());
    assert!(
        h.repo
            .stale_claim_ids(Duration::from_secs(300))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        h.repo.stale_claim_ids(Duration::ZERO).await.unwrap(),
        vec![delivery.delivery_id]
    );
    assert!(matches!(
        h.repo.claim(delivery.delivery_id, Duration::from_secs(300)).await.unwrap(),
        Claim::Held
    ));
    assert!(matches!(
        h.repo.claim(delivery.delivery_id, Duration::ZERO).await.unwrap(),
        Claim::Claimed(_)
    ));
}

#[tokio::test]
async fn test_recover_skips_deliveries_in_flight() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let in_flight = h.pending(sms(), None).await;
    let waiting = h.pending(sms(), None).await;
    h.repo
        .claim(in_flight.delivery_id, Duration::from_secs(300))
        .await
        .unwrap();

    let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::new());
    let pool = WorkerPool::new(queue.clone(), h.orchestrator.clone(), 1);

    assert_eq!(pool.recover(h.repo.as_ref()).await.unwrap(), 1);
    assert_eq!(
        queue.pop(Duration::from_millis(10)).await.unwrap(),
        Some(waiting.delivery_id)
    );
    assert_eq!(queue.pop(Duration::from_millis(10)).await.unwrap(), None);
}

#[tokio::test]
async fn test_intake_rejects_empty_batch() {
    let repo = Arc::new(MemoryDeliveryRepository::new());
    let intake = Intake::new(repo.clone(), DispatchTrigger::new(Arc::new(MemoryQueue::new())));

    let result = intake
        .create_messages(MUNICIPALITY, vec![], &Attribution::default())
        .await;

    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    assert_eq!(repo.pending_count().await, 0);
}

#[tokio::test]
async fn test_status_follows_message_through_fan_out() {
    let h = Harness::all_sent(FixedContacts::new(vec![
        preference("EMAIL", Some("kalle@example.org")),
        preference("SMS", Some("+46701234567")),
    ]));
    let status = StatusService::new(h.repo.clone());
    let delivery = h.pending(message(Uuid::new_v4()), None).await;

    let before = status
        .by_message(MUNICIPALITY, delivery.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.deliveries.len(), 1);
    assert_eq!(before.deliveries[0].status, DeliveryStatus::Pending);

    h.orchestrator.resolve_and_deliver(delivery.delivery_id).await.unwrap();

    let after = status
        .by_message(MUNICIPALITY, delivery.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.deliveries.len(), 2);
    assert!(after.deliveries.iter().all(|d| d.status == DeliveryStatus::Sent));

    // Other municipalities see nothing.
    assert!(status.by_message("1480", delivery.message_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_batch_status_reports_open_until_last_delivery() {
    let h = Harness::all_sent(FixedContacts::new(vec![]));
    let status = StatusService::new(h.repo.clone());
    let batch_id = Uuid::new_v4();
    let attachments = vec![letter_attachment(AttachmentDeliveryMode::SnailMail, "decision.pdf")];
    let first = h
        .pending(letter(None, Some(address()), attachments.clone()), Some(batch_id))
        .await;
    let second = h
        .pending(letter(None, Some(address()), attachments), Some(batch_id))
        .await;

    h.orchestrator.resolve_and_deliver(first.delivery_id).await.unwrap();
    let open = status.by_batch(MUNICIPALITY, batch_id).await.unwrap().unwrap();
    assert!(open.open);
    assert_eq!(open.messages.len(), 2);

    h.orchestrator.resolve_and_deliver(second.delivery_id).await.unwrap();
    let closed = status.by_batch(MUNICIPALITY, batch_id).await.unwrap().unwrap();
    assert!(!closed.open);
    assert!(
        closed
            .messages
            .iter()
            .all(|m| m.deliveries.iter().all(|d| d.status == DeliveryStatus::Sent))
    );
}
