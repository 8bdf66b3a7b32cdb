//! Header and body construction from templates.

use crate::config::{CallProperties, ContextConfig};
use crate::error::Result;
use crate::template::TemplateStore;
use crate::xpath::XPathElement;
use base64::prelude::*;
use chrono::{Local, SecondsFormat};
use tracing::debug;

/// Header variant with application id, initiator and originator blocks.
pub const WF_CONTEXT_2007: &str = "2007";

/// Root element of every context template.
pub const WF_CONTEXT_ELEMENT: &str = "WFContext";

/// Random bytes behind each message id.
const MESSAGE_ID_BYTES: usize = 25;

/// Fill the context template selected by `wf_context_version` and return
/// the header markup.
pub fn build_header(
    templates: &TemplateStore,
    context: &ContextConfig,
    props: &CallProperties,
    identity: &str,
) -> Result<String> {
    let mut header = templates.load_document(&props.header_template())?;
    let version = props.wf_context_version.as_str();

    header.get_element_with(&[WF_CONTEXT_ELEMENT], |wf| {
        fill_context(wf, context, version, identity);
    });

    debug!(wf_context_version = version, "Built WFContext header");
    header.root_xml()
}

/// Fill a `WFContext` element in place.
pub fn fill_context(
    wf: &mut XPathElement<'_>,
    context: &ContextConfig,
    version: &str,
    identity: &str,
) {
    wf.set_text("messageId", &generate_message_id());
    wf.set_text("creationTimestamp", &creation_timestamp());
    wf.set_text("invokerId", &context.invoker_id);
    wf.set_text("hostName", &host_name(context));
    wf.set_text("billingAU", &context.billing_au);

    let batch = identity == context.batch_process_identity;

    if version == WF_CONTEXT_2007 {
        wf.set_text("applicationId", &context.application_id);
        wf.get_element_with(&["initiator"], |initiator| {
            initiator.set_text("initiatorId", identity);
            set_initiator_id_type(initiator, context, batch);
        });
        wf.get_element_with(&["originator"], |originator| {
            originator.set_text("originatorId", identity);
        });
    } else {
        wf.set_text("activitySourceId", &context.activity_source_id);
        wf.set_text("activitySourceIdType", &context.activity_source_id_type);
        wf.set_text("initiatorId", identity);
        set_initiator_id_type(wf, context, batch);
    }
}

// Only batch callers carry an id type; the placeholder is dropped otherwise.
fn set_initiator_id_type(element: &mut XPathElement<'_>, context: &ContextConfig, batch: bool) {
    if batch {
        element.set_text("initiatorIdType", &context.batch_process_identity);
    } else {
        element.delete("initiatorIdType");
    }
}

/// Fill the body template named by `props.request` and return its markup.
pub fn build_body<F>(templates: &TemplateStore, props: &CallProperties, fill: F) -> Result<String>
where
    F: FnOnce(&mut XPathElement<'static>),
{
    let mut body = templates.load_document(&props.request)?;
    fill(&mut body);
    debug!(request = %props.request, "Built request body");
    body.to_xml()
}

/// Fresh base64 message id; never derived from input.
pub fn generate_message_id() -> String {
    let bytes: [u8; MESSAGE_ID_BYTES] = rand::random();
    BASE64_STANDARD.encode(bytes)
}

/// Local time, ISO-8601 with milliseconds and a numeric offset.
pub fn creation_timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}

fn host_name(context: &ContextConfig) -> String {
    context
        .host_name
        .clone()
        .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
}
