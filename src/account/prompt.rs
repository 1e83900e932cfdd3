//-
// Copyright (c) 2026, the Popsync authors
//
// This file is part of Popsync.
//
// Popsync is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Popsync is distributed in the hope  that it will be useful,  but WITHOUT
// ANY WARRANTY;  without even  the implied  warranty of  MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Popsync. If not, see <http://www.gnu.org/licenses/>.

//! Credential prompting.
//!
//! The worker never talks to the user directly. When it needs a password
//! it posts a [`PromptRequest`] to the channel the embedding application
//! supplied and blocks on the reply. Declining the prompt (or dropping
//! it) reads as cancellation, not as an authentication failure.

use crossbeam::channel;

use crate::support::error::Error;

/// A request for credentials, posted to the UI-owning context.
pub struct PromptRequest {
    pub account: String,
    pub host: String,
    /// A previous attempt with prompted credentials was rejected.
    pub retry: bool,
    reply: channel::Sender<Option<String>>,
}

impl PromptRequest {
    /// Answer the prompt; `None` declines it.
    pub fn respond(self, password: Option<String>) {
        // The worker may have been cancelled and gone away; that is its
        // business, not the responder's
        let _ = self.reply.send(password);
    }
}

/// Post a prompt and block until the application answers.
pub fn request_password(
    prompts: &channel::Sender<PromptRequest>,
    account: &str,
    host: &str,
    retry: bool,
) -> Result<String, Error> {
    let (reply, response) = channel::bounded(1);
    prompts
        .send(PromptRequest {
            account: account.to_owned(),
            host: host.to_owned(),
            retry,
            reply,
        })
        .map_err(|_| Error::Cancelled)?;

    match response.recv() {
        Ok(Some(password)) => Ok(password),
        // Declined, or the application dropped the request
        Ok(None) | Err(_) => Err(Error::Cancelled),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn answered_prompt_yields_the_password() {
        let (tx, rx) = channel::unbounded::<PromptRequest>();

        let responder = std::thread::spawn(move || {
            let request = rx.recv().unwrap();
            assert_eq!("sam", request.account);
            assert_eq!("mail.example.org", request.host);
            assert!(!request.retry);
            request.respond(Some("hunter2".to_owned()));
        });

        let password =
            request_password(&tx, "sam", "mail.example.org", false)
                .unwrap();
        assert_eq!("hunter2", password);
        responder.join().unwrap();
    }

    #[test]
    fn declined_prompt_is_cancellation() {
        let (tx, rx) = channel::unbounded::<PromptRequest>();

        let responder = std::thread::spawn(move || {
            rx.recv().unwrap().respond(None);
        });

        assert_matches!(
            Err(Error::Cancelled),
            request_password(&tx, "sam", "h", true)
        );
        responder.join().unwrap();
    }

    #[test]
    fn dropped_prompt_is_cancellation() {
        let (tx, rx) = channel::unbounded::<PromptRequest>();

        let responder = std::thread::spawn(move || {
            drop(rx.recv().unwrap());
        });

        assert_matches!(
            Err(Error::Cancelled),
            request_password(&tx, "sam", "h", false)
        );
        responder.join().unwrap();
    }
}
