//! Instruction documents
//!
//! The webhook surface answers with small verb-XML documents: speak, gather
//! speech, dial onward, hang up, or connect the media stream.

use crate::machine::TurnOutcome;

/// Builder for one instruction document
#[derive(Debug, Clone, Default)]
pub struct InstructionDocument {
    verbs: Vec<String>,
}

impl InstructionDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.verbs.push(format!("<Say>{}</Say>", escape(text)));
        self
    }

    /// Speech gather posting the result to the turn webhook
    pub fn gather(mut self, prompt: &str, action: &str) -> Self {
        self.verbs.push(format!(
            "<Gather input=\"speech\" action=\"{}\" method=\"POST\" speechTimeout=\"auto\"><Say>{}</Say></Gather>",
            escape(action),
            escape(prompt)
        ));
        self
    }

    pub fn dial(mut self, number: &str) -> Self {
        self.verbs.push(format!("<Dial>{}</Dial>", escape(number)));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push("<Hangup/>".to_string());
        self
    }

    /// Open the bidirectional media stream, forwarding caller and dialed
    /// numbers as custom parameters.
    pub fn connect_stream(mut self, ws_url: &str, from: &str, to: &str) -> Self {
        self.verbs.push(format!(
            "<Connect><Stream url=\"{}\">\
             <Parameter name=\"from\" value=\"{}\"/>\
             <Parameter name=\"to\" value=\"{}\"/>\
             </Stream></Connect>",
            escape(ws_url),
            escape(from),
            escape(to)
        ));
        self
    }

    pub fn render(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{}</Response>",
            self.verbs.join("")
        )
    }

    /// Render a turn outcome into the next instruction document
    pub fn from_outcome(outcome: &TurnOutcome, turn_action: &str) -> String {
        match outcome {
            TurnOutcome::Gather { prompt } => Self::new().gather(prompt, turn_action).render(),
            TurnOutcome::Hangup { text } => Self::new().say(text).hangup().render(),
            TurnOutcome::Transfer { text, to } => Self::new().say(text).dial(to).render(),
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
