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

use std::fmt;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included at the start of every log statement
/// made on behalf of one account's worker.
///
/// Clones of a `LogPrefix` share the same underlying data, so context set
/// at connect time (the resolved host, for example) shows up in statements
/// logged deeper down.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: String,
    account: Option<String>,
    host: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                account: None,
                host: None,
            })),
        }
    }

    pub fn set_account(&self, account: String) {
        self.inner.lock().unwrap().account = Some(sanitise(account));
    }

    pub fn set_host(&self, host: String) {
        self.inner.lock().unwrap().host = Some(sanitise(host));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.protocol)?;
        if inner.account.is_some() || inner.host.is_some() {
            write!(f, "[")?;
            if let Some(ref account) = inner.account {
                write!(f, "{}", account)?;
            }
            if let Some(ref host) = inner.host {
                if inner.account.is_some() {
                    write!(f, " ")?;
                }
                write!(f, "host={}", host)?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_incrementally() {
        let prefix = LogPrefix::new("pop3".to_owned());
        assert_eq!("pop3", prefix.to_string());

        let clone = prefix.clone();
        clone.set_account("sam@example.org".to_owned());
        assert_eq!("pop3[sam@example.org]", prefix.to_string());

        prefix.set_host("mail.example.org".to_owned());
        assert_eq!(
            "pop3[sam@example.org host=mail.example.org]",
            prefix.to_string()
        );
    }

    #[test]
    fn strips_control_characters() {
        let prefix = LogPrefix::new("pop3".to_owned());
        prefix.set_account("evil\r\nuser".to_owned());
        assert_eq!("pop3[eviluser]", prefix.to_string());
    }
}
