use super::session::ChatTurn;

/// Visible chat transcript of the active conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ChatTurn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Optimistically appends the user turn and an empty assistant turn.
    pub fn begin_exchange(&mut self, input: &str) -> Exchange {
        let base_len = self.turns.len();
        self.turns.push(ChatTurn::user(input));
        self.turns.push(ChatTurn::assistant(String::new()));
        Exchange {
            base_len,
            state: ExchangeState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Pending,
    Committed,
    RolledBack,
}

/// One optimistic user/assistant exchange on a [`Transcript`].
///
/// Rollback truncates to the length recorded at `begin_exchange`, so the
/// transcript is restored exactly no matter how many fragments arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    base_len: usize,
    state: ExchangeState,
}

impl Exchange {
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == ExchangeState::Pending
    }

    /// Appends a streamed fragment to the assistant turn. Ignored once the
    /// exchange is no longer pending.
    pub fn append(&self, transcript: &mut Transcript, fragment: &str) -> bool {
        if !self.is_pending() {
            return false;
        }
        match transcript.turns.get_mut(self.base_len + 1) {
            Some(turn) => {
                turn.content.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Current assistant text of this exchange.
    pub fn assistant_text<'a>(&self, transcript: &'a Transcript) -> &'a str {
        transcript
            .turns
            .get(self.base_len + 1)
            .map(|turn| turn.content.as_str())
            .unwrap_or("")
    }

    pub fn commit(&mut self) {
        if self.is_pending() {
            self.state = ExchangeState::Committed;
        }
    }

    pub fn rollback(&mut self, transcript: &mut Transcript) {
        if !self.is_pending() {
            return;
        }
        transcript.turns.truncate(self.base_len);
        self.state = ExchangeState::RolledBack;
    }
}
