use super::{HttpReply, HttpSend, Request, Sleeper, TransportError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

/// Replays canned replies in order and records every request it was given.
pub(crate) struct ScriptedSender {
  pub replies: RefCell<VecDeque<HttpReply>>,
  pub seen: RefCell<Vec<Request>>,
}

impl ScriptedSender {
  pub fn new(replies: Vec<HttpReply>) -> Self {
    Self {
      replies: RefCell::new(replies.into()),
      seen: RefCell::new(Vec::new()),
    }
  }
}

impl HttpSend for ScriptedSender {
  fn send(&self, request: &Request) -> Result<HttpReply, TransportError> {
    self.seen.borrow_mut().push(request.clone());
    Ok(self
      .replies
      .borrow_mut()
      .pop_front()
      .expect("scripted sender ran out of replies"))
  }
}

#[derive(Default)]
pub(crate) struct RecordingSleeper {
  pub delays: RefCell<Vec<Duration>>,
  pub cancel: bool,
}

impl Sleeper for RecordingSleeper {
  fn sleep(&self, delay: Duration) -> bool {
    self.delays.borrow_mut().push(delay);
    !self.cancel
  }
}

pub(crate) fn ok_reply(body: &str) -> HttpReply {
  HttpReply {
    status: 200,
    retry_after: None,
    body: body.to_string(),
  }
}
