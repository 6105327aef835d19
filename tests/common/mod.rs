//! Test utilities for libkeybase integration tests.
//!
//! [`FakeKeybase`] installs a shell script standing in for the `keybase`
//! binary. Its `chat api` mode logs every request line and acknowledges it;
//! its `chat api-listen` mode follows a feed file that tests append event
//! lines to, built with [`ScenarioBuilder`].
//!
//! By default the listener replays the whole feed. After
//! [`FakeKeybase::late_listener`] it starts slowly and only sees lines
//! appended once it is up, like the real CLI.

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use libkeybase::{ClientConfig, Environment, KeybaseClient};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

const SCRIPT: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
case "$1 $2" in
  "chat api")
    while IFS= read -r line; do
      echo "$line" >> "$dir/requests.log"
      case "$line" in
        *'"method":"send"'*)
          if [ -f "$dir/echo" ]; then cat "$dir/echo" >> "$dir/feed"; fi
          echo '{"result":{"message":"message sent","id":1}}'
          ;;
        *'"method":"reaction"'*) echo '{"result":{"message":"message reacted to","id":1}}' ;;
        *'"method":"delete"'*) echo '{"result":{"message":"message deleted","id":1}}' ;;
        *) echo '{"error":{"code":1,"message":"unknown method"}}' ;;
      esac
    done
    ;;
  "chat api-listen")
    touch "$dir/feed"
    if [ -f "$dir/late" ]; then
      sleep 0.5
      (sleep 0.1; echo "Listening for chat notifications.  Press Ctrl+C to exit." >&2) &
      exec tail -n 0 -f "$dir/feed"
    fi
    echo "Listening for chat notifications.  Press Ctrl+C to exit." >&2
    exec tail -f -n +1 "$dir/feed"
    ;;
  "ping ")
    echo "API server is up" >&2
    ;;
  "id -j")
    echo '{"username":"me"}'
    ;;
  *)
    echo "unexpected arguments: $*" >&2
    exit 2
    ;;
esac
"#;

/// A scripted stand-in for the keybase binary in a private temp dir.
pub struct FakeKeybase {
    dir: PathBuf,
}

impl FakeKeybase {
    /// Install the script.
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!(
            "libkeybase-it-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let binary = dir.join("keybase");
        fs::write(&binary, SCRIPT).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
        }
        fs::write(dir.join("feed"), "").unwrap();

        Self { dir }
    }

    /// Path of the fake binary.
    pub fn binary(&self) -> PathBuf {
        self.dir.join("keybase")
    }

    /// A config pointing at the fake binary.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::builder()
            .binary_path(self.binary())
            .username("me")
            .pool_size(4)
            .request_timeout(Duration::from_secs(5))
            .cache_size(64, 32)
            .build()
            .unwrap()
    }

    /// A client acting as `me` over the fake binary.
    pub fn client(&self) -> KeybaseClient {
        let config = self.config();
        KeybaseClient::with_environment(config, Environment::new(self.binary(), "me"))
    }

    /// Make the listener take half a second to start and skip every line
    /// written before it did.
    pub fn late_listener(&self) {
        fs::write(self.dir.join("late"), "").unwrap();
    }

    /// Append `lines` to the listen feed whenever a message is sent.
    pub fn echo_on_send(&self, lines: &[String]) {
        let mut echo = String::new();
        for line in lines {
            echo.push_str(line);
            echo.push('\n');
        }
        fs::write(self.dir.join("echo"), echo).unwrap();
    }

    /// Append event lines to the listen feed.
    pub fn push(&self, lines: &[String]) {
        let mut feed = OpenOptions::new()
            .append(true)
            .open(self.dir.join("feed"))
            .unwrap();
        for line in lines {
            writeln!(feed, "{line}").unwrap();
        }
    }

    /// Every request line received so far.
    pub fn requests(&self) -> Vec<String> {
        fs::read_to_string(self.dir.join("requests.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Requests whose method is `method`.
    pub fn requests_for(&self, method: &str) -> Vec<serde_json::Value> {
        self.requests()
            .iter()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(|request| request["method"] == method)
            .collect()
    }

    /// Wait until at least `count` requests have been logged.
    pub async fn wait_for_requests(&self, count: usize) {
        wait_until(|| self.requests().len() >= count).await;
    }
}

impl Drop for FakeKeybase {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Poll `condition` every 20ms for up to five seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Builder for `api-listen` event lines in one conversation.
pub struct ScenarioBuilder {
    conversation_id: String,
    channel: String,
    lines: Vec<String>,
}

impl ScenarioBuilder {
    /// Events in the conversation named `channel`.
    pub fn new(channel: &str) -> Self {
        Self {
            conversation_id: format!("conv-{channel}"),
            channel: channel.to_string(),
            lines: Vec::new(),
        }
    }

    /// The conversation id events are stamped with.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    fn event(&self, id: u64, sender: &str, content: serde_json::Value) -> String {
        json!({
            "type": "chat",
            "source": "remote",
            "msg": {
                "id": id,
                "conversation_id": self.conversation_id,
                "channel": { "name": self.channel, "members_type": "impteamnative" },
                "sender": { "username": sender },
                "content": content,
            }
        })
        .to_string()
    }

    /// A text message.
    pub fn text(mut self, id: u64, sender: &str, body: &str) -> Self {
        let line = self.event(id, sender, json!({ "type": "text", "text": { "body": body } }));
        self.lines.push(line);
        self
    }

    /// A reaction to message `target`.
    pub fn reaction(mut self, id: u64, sender: &str, target: u64, body: &str) -> Self {
        let line = self.event(
            id,
            sender,
            json!({ "type": "reaction", "reaction": { "m": target, "b": body } }),
        );
        self.lines.push(line);
        self
    }

    /// A delete of `targets`.
    pub fn delete(mut self, id: u64, sender: &str, targets: &[u64]) -> Self {
        let line = self.event(
            id,
            sender,
            json!({ "type": "delete", "delete": { "messageIDs": targets } }),
        );
        self.lines.push(line);
        self
    }

    /// A line the listener cannot decode.
    pub fn garbage(mut self) -> Self {
        self.lines.push("not json at all".to_string());
        self
    }

    /// The event lines, in order.
    pub fn build(self) -> Vec<String> {
        self.lines
    }
}
