//! Turn state machine
//!
//! One slot per turn. Transitions happen on validated input; empty or
//! ambiguous input reprompts up to three times before escalating to a
//! human. Emergency keywords short-circuit from any non-terminal state.

use chrono::Utc;

use hvac_voice_config::TenantConfig;
use hvac_voice_core::{CallSession, TurnRole};

use crate::parse::{
    contains_emergency, map_city_to_location, parse_phone, parse_spoken_date, parse_spoken_time,
    PhoneParse,
};

/// Reprompts allowed per state before escalation
const MAX_RETRIES: u8 = 3;

/// Nodes of the turn-based flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Greeting,
    IdentifyNeed,
    CollectName,
    CollectPhone,
    CollectAddress,
    CollectIssue,
    CollectDate,
    CollectTime,
    Confirm,
    Complete,
    Faq,
    Emergency,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::IdentifyNeed => "identify_need",
            Self::CollectName => "collect_name",
            Self::CollectPhone => "collect_phone",
            Self::CollectAddress => "collect_address",
            Self::CollectIssue => "collect_issue",
            Self::CollectDate => "collect_date",
            Self::CollectTime => "collect_time",
            Self::Confirm => "confirm",
            Self::Complete => "complete",
            Self::Faq => "faq",
            Self::Emergency => "emergency",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "greeting" => Some(Self::Greeting),
            "identify_need" => Some(Self::IdentifyNeed),
            "collect_name" => Some(Self::CollectName),
            "collect_phone" => Some(Self::CollectPhone),
            "collect_address" => Some(Self::CollectAddress),
            "collect_issue" => Some(Self::CollectIssue),
            "collect_date" => Some(Self::CollectDate),
            "collect_time" => Some(Self::CollectTime),
            "confirm" => Some(Self::Confirm),
            "complete" => Some(Self::Complete),
            "faq" => Some(Self::Faq),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

/// What the webhook should answer with
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Ask and gather the next speech result
    Gather { prompt: String },
    /// Final words, then the provider completes the call
    Hangup { text: String },
    /// Urgency acknowledgment plus a dial instruction
    Transfer { text: String, to: String },
}

/// The turn-based flow for one tenant
pub struct TurnFlow<'a> {
    tenant: &'a TenantConfig,
}

impl<'a> TurnFlow<'a> {
    pub fn new(tenant: &'a TenantConfig) -> Self {
        Self { tenant }
    }

    fn transfer_number(&self) -> String {
        if !self.tenant.transfer_phone.is_empty() {
            self.tenant.transfer_phone.clone()
        } else {
            self.tenant.emergency_phone.clone()
        }
    }

    /// Process one gather result and advance the machine. The session is
    /// persisted by the caller between turns.
    pub fn handle_turn(&self, session: &mut CallSession, speech: Option<&str>) -> TurnOutcome {
        let state = session
            .flow_state
            .as_deref()
            .and_then(FlowState::from_str)
            .unwrap_or(FlowState::Greeting);

        if let Some(text) = speech {
            if !text.trim().is_empty() {
                session.push_turn(TurnRole::Caller, text.trim(), None);
            }
        }

        // Emergency short-circuits every non-terminal state
        if state != FlowState::Complete {
            if let Some(text) = speech {
                if contains_emergency(text) {
                    session.flags.emergency_detected = true;
                    set_state(session, FlowState::Emergency);
                    let text = "That sounds like an emergency. Please leave the building if \
                                you smell gas. I'm connecting you to our emergency line right now."
                        .to_string();
                    session.push_turn(TurnRole::Agent, text.clone(), None);
                    let to = if !self.tenant.emergency_phone.is_empty() {
                        self.tenant.emergency_phone.clone()
                    } else {
                        self.transfer_number()
                    };
                    return TurnOutcome::Transfer { text, to };
                }
            }
        }

        let outcome = match state {
            FlowState::Greeting => {
                set_state(session, FlowState::IdentifyNeed);
                self.gather(
                    session,
                    format!(
                        "{} Are you calling about a repair, maintenance, or something else?",
                        self.tenant.greeting
                    ),
                )
            }

            FlowState::IdentifyNeed => {
                let text = speech.unwrap_or_default().to_lowercase();
                if text.contains("hour") || text.contains("open") || text.contains("where") {
                    set_state(session, FlowState::Faq);
                    self.gather(
                        session,
                        "We're open eight to six on weekdays. Is there anything else I can \
                         help with, or would you like to book a visit?"
                            .to_string(),
                    )
                } else if text.trim().is_empty() {
                    self.reprompt(
                        session,
                        state,
                        "Sorry, I didn't catch that. Are you calling about a repair or \
                         maintenance?",
                    )
                } else {
                    set_state(session, FlowState::CollectName);
                    self.gather(
                        session,
                        "I can help with that. May I have your name, please?".to_string(),
                    )
                }
            }

            FlowState::Faq => {
                let text = speech.unwrap_or_default().to_lowercase();
                if text.contains("no") || text.contains("that's all") {
                    let goodbye = "Glad I could help. Have a great day!".to_string();
                    set_state(session, FlowState::Complete);
                    session.push_turn(TurnRole::Agent, goodbye.clone(), None);
                    TurnOutcome::Hangup { text: goodbye }
                } else {
                    set_state(session, FlowState::CollectName);
                    self.gather(
                        session,
                        "Happy to book a visit. May I have your name, please?".to_string(),
                    )
                }
            }

            FlowState::CollectName => {
                let name = speech.unwrap_or_default().trim().to_string();
                if name.is_empty() || name.split_whitespace().count() > 6 {
                    self.reprompt(session, state, "Sorry, what name should I put down?")
                } else {
                    session.slots.name = Some(name);
                    set_state(session, FlowState::CollectPhone);
                    self.gather(
                        session,
                        "Thanks! What's the best callback number, digit by digit?".to_string(),
                    )
                }
            }

            FlowState::CollectPhone => {
                match parse_phone(
                    speech.unwrap_or_default(),
                    session.flow_partial_phone.as_deref(),
                ) {
                    PhoneParse::Complete(phone) => {
                        session.slots.callback_phone = Some(phone);
                        session.flow_partial_phone = None;
                        set_state(session, FlowState::CollectAddress);
                        self.gather(
                            session,
                            "Got it. What city and street address is the unit at?".to_string(),
                        )
                    }
                    PhoneParse::Partial(digits) => {
                        session.flow_partial_phone = Some(digits);
                        // Partial collection continues in the same state
                        self.gather(
                            session,
                            "Okay, go ahead with the rest of the number.".to_string(),
                        )
                    }
                    PhoneParse::None => {
                        session.flow_partial_phone = None;
                        self.reprompt(
                            session,
                            state,
                            "Sorry, I didn't get the number. Could you say it digit by digit?",
                        )
                    }
                }
            }

            FlowState::CollectAddress => {
                let address = speech.unwrap_or_default().trim().to_string();
                if address.is_empty() {
                    self.reprompt(session, state, "Sorry, what's the address?")
                } else {
                    if let Some(code) = map_city_to_location(&address) {
                        session.slots.location_code = Some(code.to_string());
                    }
                    session.slots.address = Some(address);
                    set_state(session, FlowState::CollectIssue);
                    self.gather(
                        session,
                        "And briefly, what's going on with the system?".to_string(),
                    )
                }
            }

            FlowState::CollectIssue => {
                let issue = speech.unwrap_or_default().trim().to_string();
                if issue.is_empty() {
                    self.reprompt(session, state, "Sorry, could you describe the problem?")
                } else {
                    session.slots.issue = Some(issue);
                    set_state(session, FlowState::CollectDate);
                    self.gather(
                        session,
                        "What day works best for the visit?".to_string(),
                    )
                }
            }

            FlowState::CollectDate => {
                match parse_spoken_date(speech.unwrap_or_default(), Utc::now().date_naive()) {
                    Some(date) => {
                        session.slots.preferred_date = Some(date.format("%Y-%m-%d").to_string());
                        set_state(session, FlowState::CollectTime);
                        self.gather(session, "And what time of day?".to_string())
                    }
                    None => self.reprompt(
                        session,
                        state,
                        "Sorry, which day would you like? You can say tomorrow or a weekday.",
                    ),
                }
            }

            FlowState::CollectTime => match parse_spoken_time(speech.unwrap_or_default()) {
                Some(time) => {
                    session.slots.preferred_time = Some(time.format("%H:%M").to_string());
                    set_state(session, FlowState::Confirm);
                    let prompt = format!(
                        "To confirm: {} at {} on {}, and we'll call {} if anything changes. \
                         Shall I book it?",
                        session.slots.name.as_deref().unwrap_or("you"),
                        session.slots.preferred_time.as_deref().unwrap_or(""),
                        session.slots.preferred_date.as_deref().unwrap_or(""),
                        session.slots.callback_phone.as_deref().unwrap_or(""),
                    );
                    self.gather(session, prompt)
                }
                None => self.reprompt(
                    session,
                    state,
                    "Sorry, what time of day? Morning or afternoon both work.",
                ),
            },

            FlowState::Confirm => {
                let text = speech.unwrap_or_default().to_lowercase();
                if text.contains("yes") || text.contains("yeah") || text.contains("book") {
                    set_state(session, FlowState::Complete);
                    let goodbye = "You're all set. We'll see you then, and you'll get a \
                                   confirmation shortly. Goodbye!"
                        .to_string();
                    session.push_turn(TurnRole::Agent, goodbye.clone(), None);
                    TurnOutcome::Hangup { text: goodbye }
                } else if text.contains("no") {
                    set_state(session, FlowState::CollectDate);
                    self.gather(
                        session,
                        "No problem. What day would work better?".to_string(),
                    )
                } else {
                    self.reprompt(session, state, "Should I book it? Yes or no is fine.")
                }
            }

            FlowState::Complete | FlowState::Emergency => {
                let goodbye = "Thanks for calling. Goodbye!".to_string();
                TurnOutcome::Hangup { text: goodbye }
            }
        };

        outcome
    }

    fn gather(&self, session: &mut CallSession, prompt: String) -> TurnOutcome {
        session.flow_retries = 0;
        session.push_turn(TurnRole::Agent, prompt.clone(), None);
        TurnOutcome::Gather { prompt }
    }

    /// Stay in the current state and ask again; escalate after the retry
    /// budget is spent.
    fn reprompt(&self, session: &mut CallSession, state: FlowState, prompt: &str) -> TurnOutcome {
        session.flow_retries += 1;
        if session.flow_retries >= MAX_RETRIES {
            session.flags.transfer_requested = true;
            let text =
                "I'm having trouble understanding. Let me connect you with someone who can help."
                    .to_string();
            session.push_turn(TurnRole::Agent, text.clone(), None);
            return TurnOutcome::Transfer {
                text,
                to: self.transfer_number(),
            };
        }
        set_state(session, state);
        session.push_turn(TurnRole::Agent, prompt.to_string(), None);
        TurnOutcome::Gather {
            prompt: prompt.to_string(),
        }
    }
}

fn set_state(session: &mut CallSession, state: FlowState) {
    session.flow_state = Some(state.as_str().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantConfig {
        TenantConfig {
            transfer_phone: "+15005550006".to_string(),
            emergency_phone: "+15005550911".to_string(),
            ..TenantConfig::default()
        }
    }

    fn session() -> CallSession {
        CallSession::new("CA1", "+15550001111", "+15559990000", "default")
    }

    fn drive<'a>(
        flow: &TurnFlow<'a>,
        session: &mut CallSession,
        inputs: &[Option<&str>],
    ) -> TurnOutcome {
        let mut last = None;
        for input in inputs {
            last = Some(flow.handle_turn(session, *input));
        }
        last.unwrap()
    }

    #[test]
    fn full_booking_path_fills_every_slot() {
        let tenant = tenant();
        let flow = TurnFlow::new(&tenant);
        let mut s = session();

        let outcome = drive(
            &flow,
            &mut s,
            &[
                None,                        // greeting
                Some("my AC is broken"),     // identify_need
                Some("Alice Johnson"),       // collect_name
                Some("five five five one two three four five six seven"), // collect_phone
                Some("214 Oak Street in Euless"), // collect_address
                Some("no cold air at all"),  // collect_issue
                Some("tomorrow"),            // collect_date
                Some("9 am"),                // collect_time
                Some("yes please"),          // confirm
            ],
        );

        assert!(matches!(outcome, TurnOutcome::Hangup { .. }));
        assert_eq!(s.flow_state.as_deref(), Some("complete"));
        assert_eq!(s.slots.name.as_deref(), Some("Alice Johnson"));
        assert_eq!(s.slots.callback_phone.as_deref(), Some("+15551234567"));
        assert_eq!(s.slots.location_code.as_deref(), Some("FTW"));
        assert_eq!(s.slots.preferred_time.as_deref(), Some("09:00"));
        assert!(s.slots.booking_complete());
    }

    #[test]
    fn phone_collects_across_two_turns() {
        let tenant = tenant();
        let flow = TurnFlow::new(&tenant);
        let mut s = session();
        s.flow_state = Some("collect_phone".to_string());

        let first = flow.handle_turn(&mut s, Some("five five five"));
        assert!(matches!(first, TurnOutcome::Gather { .. }));
        assert_eq!(s.flow_partial_phone.as_deref(), Some("555"));
        assert_eq!(s.flow_state.as_deref(), Some("collect_phone"));

        flow.handle_turn(&mut s, Some("one two three four five six seven"));
        assert_eq!(s.slots.callback_phone.as_deref(), Some("+15551234567"));
        assert_eq!(s.flow_state.as_deref(), Some("collect_address"));
    }

    #[test]
    fn emergency_short_circuits_any_state() {
        let tenant = tenant();
        let flow = TurnFlow::new(&tenant);
        let mut s = session();
        s.flow_state = Some("collect_issue".to_string());

        let outcome = flow.handle_turn(&mut s, Some("actually I smell gas"));
        let TurnOutcome::Transfer { to, text } = outcome else {
            panic!("expected transfer");
        };
        assert_eq!(to, "+15005550911");
        assert!(text.to_lowercase().contains("emergency"));
        assert!(s.flags.emergency_detected);
        assert_eq!(s.flow_state.as_deref(), Some("emergency"));
    }

    #[test]
    fn bounded_reprompts_then_escalation() {
        let tenant = tenant();
        let flow = TurnFlow::new(&tenant);
        let mut s = session();
        s.flow_state = Some("collect_date".to_string());

        let first = flow.handle_turn(&mut s, Some("whenever really"));
        assert!(matches!(first, TurnOutcome::Gather { .. }));
        let second = flow.handle_turn(&mut s, Some("dunno"));
        assert!(matches!(second, TurnOutcome::Gather { .. }));
        let third = flow.handle_turn(&mut s, Some("hmm"));
        let TurnOutcome::Transfer { to, .. } = third else {
            panic!("expected escalation transfer");
        };
        assert_eq!(to, "+15005550006");
        assert!(s.flags.transfer_requested);
    }

    #[test]
    fn faq_answers_and_can_end_the_call() {
        let tenant = tenant();
        let flow = TurnFlow::new(&tenant);
        let mut s = session();

        flow.handle_turn(&mut s, None); // greeting
        let outcome = flow.handle_turn(&mut s, Some("what are your hours?"));
        let TurnOutcome::Gather { prompt } = outcome else {
            panic!("expected gather");
        };
        assert!(prompt.contains("open"));

        let outcome = flow.handle_turn(&mut s, Some("no that's all thanks"));
        assert!(matches!(outcome, TurnOutcome::Hangup { .. }));
    }
}
