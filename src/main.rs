//! Records a scripted page session and prints every packed event as one JSON line.
//!
//! Usage: `domrec [options.toml]`

use bus::{HostEvent, host_channels};
use core_types::MouseInteractionKind;
use dom::{Dom, NodeRef, ReadyState};
use record::{Emitted, RecordError, RecordOptions, Recorder, RecorderParts, pack_json};
use std::process::ExitCode;
use url::Url;

#[derive(Debug)]
enum DemoError {
    Options(std::io::Error),
    Url(url::ParseError),
    HostGone,
    Record(RecordError),
}

impl std::fmt::Display for DemoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemoError::Options(err) => write!(f, "cannot read options: {err}"),
            DemoError::Url(err) => write!(f, "bad page url: {err}"),
            DemoError::HostGone => write!(f, "recorder side of the host bus is gone"),
            DemoError::Record(err) => write!(f, "{err}"),
        }
    }
}

impl From<RecordError> for DemoError {
    fn from(err: RecordError) -> Self {
        DemoError::Record(err)
    }
}

impl From<dom::DomError> for DemoError {
    fn from(err: dom::DomError) -> Self {
        DemoError::Record(RecordError::Dom(err))
    }
}

fn load_options() -> Result<RecordOptions, DemoError> {
    match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(DemoError::Options)?;
            Ok(RecordOptions::from_toml_str(&source)?)
        }
        None => Ok(RecordOptions::default()),
    }
}

fn build_page(dom: &mut Dom) -> Result<(NodeRef, NodeRef), DemoError> {
    let url = Url::parse("https://demo.test/").map_err(DemoError::Url)?;
    let doc = dom.create_document_with_state(url, ReadyState::Loading);
    let doctype = dom.create_doctype("html");
    let html = dom.create_element("html");
    let body = dom.create_element("body");
    let heading = dom.create_element("h1");
    let title = dom.create_text("Recorder demo");
    dom.append_child(doc, doctype)?;
    dom.append_child(doc, html)?;
    dom.append_child(html, body)?;
    dom.append_child(body, heading)?;
    dom.append_child(heading, title)?;
    Ok((doc, body))
}

fn run() -> Result<(), DemoError> {
    let options = load_options()?;
    let mut dom = Dom::new();
    let (doc, body) = build_page(&mut dom)?;
    let (host, bus) = host_channels();
    let parts = RecorderParts::new()
        .sink(|event: Emitted, _is_checkout: bool| {
            if let Emitted::Packed(line) = event {
                println!("{line}");
            }
        })
        .pack(pack_json)
        .bus(bus);
    let mut recorder = Recorder::start(&mut dom, doc, options, parts)?;

    dom.set_ready_state(doc, ReadyState::Interactive)?;
    recorder.pump(&mut dom)?;
    dom.set_ready_state(doc, ReadyState::Complete)?;
    recorder.pump(&mut dom)?;

    let list = dom.create_element("ul");
    dom.set_attribute(list, "class", "items")?;
    for label in ["alpha", "beta"] {
        let item = dom.create_element("li");
        let text = dom.create_text(label);
        dom.append_child(item, text)?;
        dom.append_child(list, item)?;
    }
    dom.append_child(body, list)?;
    recorder.pump(&mut dom)?;

    let card = dom.create_element("x-card");
    dom.append_child(body, card)?;
    recorder.pump(&mut dom)?;
    let shadow = dom.attach_shadow(card)?;
    let slot = dom.create_element("slot");
    dom.append_child(shadow, slot)?;
    recorder.pump(&mut dom)?;

    recorder.freeze()?;
    dom.set_attribute(list, "class", "items busy")?;
    dom.set_attribute(list, "class", "items done")?;
    recorder.pump(&mut dom)?;
    recorder.unfreeze(&mut dom)?;

    // The host reports interactions it observed itself.
    host.events_tx
        .send(HostEvent::MouseInteraction {
            target: list,
            kind: MouseInteractionKind::Click,
            x: Some(12.0),
            y: Some(40.0),
        })
        .map_err(|_| DemoError::HostGone)?;
    recorder.pump(&mut dom)?;

    recorder.add_custom_event(&mut dom, "demo", serde_json::json!({"step": "done"}))?;
    recorder.stop(&mut dom);
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("domrec: {err}");
            ExitCode::FAILURE
        }
    }
}
