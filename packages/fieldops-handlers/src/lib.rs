//! Domain handler implementations: the business logic behind each tool
//! contract in the catalog. The substrate itself (registry, queue, worker)
//! has no opinion about what a `leads.create` or `comms.send_sms` actually
//! does — these modules are that opinion, registered into a
//! `fieldops_worker::HandlerRegistry` at daemon/CLI startup.

pub mod comms;
pub mod inspections;
pub mod leads;
pub mod quotes;
pub mod tasks;

use fieldops_worker::HandlerRegistry;

/// Register every handler this crate provides. `sms` is the one handler
/// that needs a constructed dependency (Twilio credentials, or none) rather
/// than being state-free, so it's threaded through explicitly.
pub fn register_all(registry: &mut HandlerRegistry, sms: comms::SmsHandler) {
    leads::register(registry);
    tasks::register(registry);
    inspections::register(registry);
    quotes::register(registry);
    comms::register(registry, sms);
}
