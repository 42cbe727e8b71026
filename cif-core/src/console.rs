use crate::api::params::split_list;
use crate::api::{
  Client, FeedQuery, IndicatorQuery, IndicatorSubmission, Mode, Reply, TokenQuery, TokenSpec,
  TokenUpdate,
};
use crate::config::{self, Config};
use crate::normalize::{DatePolicy, Normalized};
use crate::transport::{Request, Sleeper};
use anyhow::Context;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
  pub raw: bool,
  pub json: bool,
  pub verbose: bool,
  pub strict_dates: bool,
  pub remote: Option<String>,
  pub token: Option<String>,
  pub proxy: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
  Help,
  Ping,
  Search(IndicatorQuery),
  Submit(IndicatorSubmission),
  Delete(IndicatorQuery),
  Feed(FeedQuery),
  TokensList(TokenQuery),
  TokensCreate(TokenSpec),
  TokensDelete(TokenQuery),
  TokensUpdate(TokenUpdate),
  ConfigShow,
  ConfigSet { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
  pub globals: GlobalOptions,
  pub command: Command,
}

struct ArgList {
  items: Vec<String>,
}

impl ArgList {
  fn take_flag(&mut self, name: &str) -> bool {
    match self.items.iter().position(|a| a == name) {
      Some(i) => {
        self.items.remove(i);
        true
      }
      None => false,
    }
  }

  fn take_value(&mut self, name: &str) -> anyhow::Result<Option<String>> {
    let Some(i) = self.items.iter().position(|a| a == name) else {
      return Ok(None);
    };
    if i + 1 >= self.items.len() {
      anyhow::bail!("`{name}` expects a value");
    }
    let value = self.items.remove(i + 1);
    self.items.remove(i);
    Ok(Some(value))
  }

  fn take_u32(&mut self, name: &str) -> anyhow::Result<Option<u32>> {
    self
      .take_value(name)?
      .map(|v| {
        v.trim()
          .parse::<u32>()
          .with_context(|| format!("`{name}` expects a non-negative integer"))
      })
      .transpose()
  }

  fn take_list(&mut self, name: &str) -> anyhow::Result<Vec<String>> {
    Ok(self.take_value(name)?.map(|v| split_list(&v)).unwrap_or_default())
  }

  /// Takes the leading word. Words must come before the command's flags.
  fn take_word(&mut self, what: &str) -> anyhow::Result<Option<String>> {
    match self.items.first() {
      None => Ok(None),
      Some(flag) if flag.starts_with('-') => {
        anyhow::bail!("expected {what} before `{flag}`")
      }
      Some(_) => Ok(Some(self.items.remove(0))),
    }
  }

  fn finish(self) -> anyhow::Result<()> {
    if !self.items.is_empty() {
      anyhow::bail!("unexpected arguments: {}", self.items.join(" "));
    }
    Ok(())
  }
}

/// Parses `args` as passed to the process (program name first).
pub fn parse_args(args: &[String]) -> anyhow::Result<Invocation> {
  let mut list = ArgList {
    items: args.iter().skip(1).cloned().collect(),
  };

  if list.take_flag("--help") || list.take_flag("-h") {
    return Ok(Invocation {
      globals: GlobalOptions::default(),
      command: Command::Help,
    });
  }

  let globals = GlobalOptions {
    raw: list.take_flag("--raw"),
    json: list.take_flag("--json"),
    verbose: list.take_flag("--verbose"),
    strict_dates: list.take_flag("--strict-dates"),
    remote: list.take_value("--remote")?,
    token: list.take_value("--api-token")?,
    proxy: list.take_value("--proxy")?,
  };

  let Some(name) = list.take_word("a command")? else {
    return Ok(Invocation {
      globals,
      command: Command::Help,
    });
  };

  let command = match name.as_str() {
    "ping" => Command::Ping,
    "search" => Command::Search(indicator_query(&mut list)?),
    "delete" => {
      let q = indicator_query(&mut list)?;
      if !q.has_filter() {
        anyhow::bail!("`delete` needs at least one filter such as --indicator");
      }
      Command::Delete(q)
    }
    "submit" => Command::Submit(IndicatorSubmission {
      indicator: list
        .take_value("--indicator")?
        .ok_or_else(|| anyhow::anyhow!("`submit` requires --indicator"))?,
      tags: list.take_list("--tags")?,
      tlp: list.take_value("--tlp")?,
      confidence: list.take_u32("--confidence")?,
      provider: list.take_value("--provider")?,
      group: list.take_value("--group")?,
      description: list.take_value("--description")?,
      lasttime: list.take_value("--lasttime")?,
      portlist: list.take_value("--portlist")?,
      protocol: list.take_value("--protocol")?,
    }),
    "feed" => Command::Feed(FeedQuery {
      itype: list
        .take_value("--itype")?
        .ok_or_else(|| anyhow::anyhow!("`feed` requires --itype"))?,
      confidence: list.take_u32("--confidence")?,
      provider: list.take_value("--provider")?,
      tags: list.take_list("--tags")?,
      tlp: list.take_value("--tlp")?,
      days: list.take_u32("--days")?,
      limit: list.take_u32("--limit")?,
    }),
    "tokens" => tokens_command(&mut list)?,
    "config" => config_command(&mut list)?,
    other => anyhow::bail!("unknown command `{other}`; see --help"),
  };

  list.finish()?;
  Ok(Invocation { globals, command })
}

fn indicator_query(list: &mut ArgList) -> anyhow::Result<IndicatorQuery> {
  Ok(IndicatorQuery {
    indicator: list.take_value("--indicator")?,
    itype: list.take_value("--itype")?,
    confidence: list.take_u32("--confidence")?,
    provider: list.take_value("--provider")?,
    tags: list.take_list("--tags")?,
    tlp: list.take_value("--tlp")?,
    group: list.take_value("--group")?,
    reporttime: list.take_value("--reporttime")?,
    reporttime_end: list.take_value("--reporttime-end")?,
    firsttime: list.take_value("--firsttime")?,
    lasttime: list.take_value("--lasttime")?,
    limit: list.take_u32("--limit")?,
    nolog: list.take_flag("--nolog"),
  })
}

fn tokens_command(list: &mut ArgList) -> anyhow::Result<Command> {
  let sub = list.take_word("a subcommand")?.unwrap_or_default();
  match sub.as_str() {
    "list" => Ok(Command::TokensList(TokenQuery {
      username: list.take_value("--username")?,
      token: list.take_value("--token")?,
    })),
    "create" => Ok(Command::TokensCreate(TokenSpec {
      username: list
        .take_value("--username")?
        .ok_or_else(|| anyhow::anyhow!("`tokens create` requires --username"))?,
      admin: list.take_flag("--admin"),
      read: list.take_flag("--read"),
      write: list.take_flag("--write"),
      expires: list.take_value("--expires")?,
      groups: list.take_list("--groups")?,
    })),
    "delete" => {
      let q = TokenQuery {
        username: list.take_value("--username")?,
        token: list.take_value("--token")?,
      };
      if q.username.is_none() && q.token.is_none() {
        anyhow::bail!("`tokens delete` requires --username or --token");
      }
      Ok(Command::TokensDelete(q))
    }
    "update" => Ok(Command::TokensUpdate(TokenUpdate {
      token: list
        .take_value("--token")?
        .ok_or_else(|| anyhow::anyhow!("`tokens update` requires --token"))?,
      groups: list.take_list("--groups")?,
    })),
    _ => anyhow::bail!("unknown `tokens` subcommand. Expected: list|create|delete|update"),
  }
}

fn config_command(list: &mut ArgList) -> anyhow::Result<Command> {
  let sub = list.take_word("a subcommand")?.unwrap_or_default();
  match sub.as_str() {
    "show" => Ok(Command::ConfigShow),
    "set" => {
      let key = list
        .take_word("<key>")?
        .ok_or_else(|| anyhow::anyhow!("`config set` expects <key> <value>"))?;
      let value = list
        .take_word("<value>")?
        .ok_or_else(|| anyhow::anyhow!("`config set` expects <key> <value>"))?;
      Ok(Command::ConfigSet { key, value })
    }
    _ => anyhow::bail!("unknown `config` subcommand. Expected: show|set"),
  }
}

pub fn run<Z: Sleeper>(
  cfg: &mut Config,
  config_path: &Path,
  invocation: Invocation,
  sleeper: Z,
) -> anyhow::Result<()> {
  let Invocation { globals, command } = invocation;

  match command {
    Command::Help => {
      print_help();
      return Ok(());
    }
    Command::ConfigShow => {
      print_config(cfg);
      return Ok(());
    }
    Command::ConfigSet { key, value } => {
      config::set_value(cfg, &key, &value)?;
      config::save(config_path, cfg)
        .with_context(|| format!("write {}", config_path.display()))?;
      tracing::info!(key = %key, "config value updated");
      println!("{key} updated in {}", config_path.display());
      return Ok(());
    }
    _ => {}
  }

  let effective = apply_overrides(cfg, &globals);
  let date_policy = if globals.strict_dates {
    DatePolicy::Strict
  } else {
    DatePolicy::Lenient
  };
  let client = Client::with_sleeper(&effective, sleeper).with_date_policy(date_policy);
  let request = build_request(&client, &command)?;
  let mode = if globals.raw { Mode::Raw } else { Mode::Normalized };

  let reply = client.call(&request, mode)?;
  print_reply(&reply, globals.json)
}

fn build_request<S, Z>(client: &Client<S, Z>, command: &Command) -> anyhow::Result<Request>
where
  S: crate::transport::HttpSend,
  Z: Sleeper,
{
  let req = match command {
    Command::Ping => client.ping_request()?,
    Command::Search(q) => client.search_request(q)?,
    Command::Submit(s) => client.submit_request(s)?,
    Command::Delete(q) => client.delete_request(q)?,
    Command::Feed(q) => client.feed_request(q)?,
    Command::TokensList(q) => client.list_tokens_request(q)?,
    Command::TokensCreate(spec) => client.create_token_request(spec)?,
    Command::TokensDelete(q) => client.delete_token_request(q)?,
    Command::TokensUpdate(u) => client.update_token_request(u)?,
    Command::Help | Command::ConfigShow | Command::ConfigSet { .. } => {
      anyhow::bail!("command does not call the API")
    }
  };
  Ok(req)
}

/// Command-line values win over the file; nothing here is written back.
pub fn apply_overrides(cfg: &Config, globals: &GlobalOptions) -> Config {
  let mut out = cfg.clone();
  if let Some(remote) = &globals.remote {
    out.client.remote = remote.clone();
  }
  if let Some(token) = &globals.token {
    out.client.token = token.clone();
  }
  if let Some(proxy) = &globals.proxy {
    out.client.proxy = proxy.clone();
  }
  if globals.verbose {
    out.client.verbose = true;
  }
  out
}

fn print_reply(reply: &Reply, json: bool) -> anyhow::Result<()> {
  match reply {
    Reply::Raw(v) => println!("{}", serde_json::to_string_pretty(v)?),
    Reply::Items(items) if json => println!("{}", serde_json::to_string_pretty(items)?),
    Reply::Items(items) if items.is_empty() => println!("No results."),
    Reply::Items(items) => {
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          println!();
        }
        println!("{}", render_item(item));
      }
    }
  }
  Ok(())
}

pub fn render_item(item: &Normalized) -> String {
  match item {
    Normalized::Record(record) => {
      let width = record.keys().map(str::len).max().unwrap_or(0);
      record
        .iter()
        .map(|(k, v)| format!("{k:<width$} : {v}"))
        .collect::<Vec<_>>()
        .join("\n")
    }
    Normalized::Scalar(s) => s.to_string(),
    Normalized::Boolean(b) => b.to_string(),
  }
}

fn print_config(cfg: &Config) {
  println!("Remote: {}", cfg.client.remote);
  println!("Token: {}", mask_token(&cfg.client.token));
  println!(
    "Proxy: {}",
    cfg.client.proxy().unwrap_or_else(|| "(none)".to_string())
  );
  println!("Verify SSL: {}", cfg.client.verify_ssl);
  println!("Verbose: {}", cfg.client.verbose);
  println!("Timeout: {}s", cfg.client.timeout_seconds);
  match cfg.retry.max_attempts {
    0 => println!("Retry attempts: unbounded"),
    n => println!("Retry attempts: {n}"),
  }
  match cfg.retry.max_elapsed_seconds {
    0 => println!("Retry time limit: unbounded"),
    n => println!("Retry time limit: {n}s"),
  }
  println!("Log level: {}", cfg.logging.level);
}

fn mask_token(token: &str) -> String {
  let chars: Vec<char> = token.chars().collect();
  if chars.is_empty() {
    return "(not set)".to_string();
  }
  if chars.len() <= 8 {
    return "*".repeat(chars.len());
  }
  let tail: String = chars[chars.len() - 4..].iter().collect();
  format!("****{tail}")
}

pub fn print_help() {
  println!("cif-client v{}", env!("CARGO_PKG_VERSION"));
  println!("Global flags:");
  println!("  --raw              print the server payload without normalizing");
  println!("  --json             print normalized results as JSON");
  println!("  --verbose          log requests to stderr");
  println!("  --strict-dates     fail on timestamps that cannot be parsed");
  println!("  --remote URL | --api-token TOKEN | --proxy URL");
  println!("Commands:");
  println!("  ping");
  println!("  search [--indicator X] [--itype T] [--tags a,b] [--confidence N] [--provider P]");
  println!("         [--tlp L] [--group G] [--reporttime T] [--reporttime-end T] [--limit N] [--nolog]");
  println!("  submit --indicator X [--tags a,b] [--tlp L] [--confidence N] [--provider P]");
  println!("         [--group G] [--description D] [--lasttime T] [--portlist P] [--protocol P]");
  println!("  delete --indicator X [same filters as search]");
  println!("  feed --itype T [--tags a,b] [--confidence N] [--provider P] [--tlp L] [--days N] [--limit N]");
  println!("  tokens list [--username U] [--token T]");
  println!("  tokens create --username U [--admin] [--read] [--write] [--expires T] [--groups a,b]");
  println!("  tokens delete (--username U | --token T)");
  println!("  tokens update --token T --groups a,b");
  println!("  config show");
  println!("  config set <key> <value>   (e.g. client.token, client.remote, retry.max_attempts)");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::{FieldValue, NormalizedRecord, Scalar};

  fn args(line: &str) -> Vec<String> {
    std::iter::once("cif-client")
      .chain(line.split_whitespace())
      .map(str::to_string)
      .collect()
  }

  #[test]
  fn search_with_globals_anywhere() {
    let inv = parse_args(&args("--json search --indicator example.com --raw --tags a,b --limit 5")).unwrap();
    assert!(inv.globals.json);
    assert!(inv.globals.raw);
    match inv.command {
      Command::Search(q) => {
        assert_eq!(q.indicator.as_deref(), Some("example.com"));
        assert_eq!(q.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(q.limit, Some(5));
      }
      other => panic!("unexpected command {other:?}"),
    }
  }

  #[test]
  fn no_command_shows_help() {
    assert_eq!(parse_args(&args("")).unwrap().command, Command::Help);
    assert_eq!(parse_args(&args("ping --help")).unwrap().command, Command::Help);
  }

  #[test]
  fn feed_requires_itype() {
    assert!(parse_args(&args("feed --days 3")).is_err());
    let inv = parse_args(&args("feed --itype fqdn --days 3")).unwrap();
    assert!(matches!(inv.command, Command::Feed(ref q) if q.itype == "fqdn" && q.days == Some(3)));
  }

  #[test]
  fn delete_without_filters_is_rejected() {
    assert!(parse_args(&args("delete")).is_err());
    assert!(parse_args(&args("delete --limit 5")).is_err());
  }

  #[test]
  fn token_subcommands_parse() {
    let inv = parse_args(&args("tokens create --username analyst --read --groups everyone,partners")).unwrap();
    match inv.command {
      Command::TokensCreate(spec) => {
        assert_eq!(spec.username, "analyst");
        assert!(spec.read);
        assert!(!spec.admin);
        assert_eq!(spec.groups.len(), 2);
      }
      other => panic!("unexpected command {other:?}"),
    }

    assert!(parse_args(&args("tokens delete")).is_err());
    assert!(parse_args(&args("tokens rotate")).is_err());
  }

  #[test]
  fn words_must_precede_command_flags() {
    assert!(parse_args(&args("--indicator example.com search")).is_err());
    assert!(parse_args(&args("tokens --username analyst list")).is_err());
    assert!(parse_args(&args("config set client.token --tags x")).is_err());

    let inv = parse_args(&args("--remote https://cif.example.org tokens list --username analyst")).unwrap();
    assert_eq!(inv.globals.remote.as_deref(), Some("https://cif.example.org"));
    assert_eq!(
      inv.command,
      Command::TokensList(TokenQuery {
        username: Some("analyst".to_string()),
        token: None
      })
    );
  }

  #[test]
  fn config_set_takes_key_and_value() {
    let inv = parse_args(&args("config set client.token abc123")).unwrap();
    assert_eq!(
      inv.command,
      Command::ConfigSet {
        key: "client.token".to_string(),
        value: "abc123".to_string()
      }
    );
  }

  #[test]
  fn leftovers_and_bad_numbers_are_errors() {
    assert!(parse_args(&args("ping extra")).is_err());
    assert!(parse_args(&args("search --limit lots")).is_err());
    assert!(parse_args(&args("search --indicator")).is_err());
    assert!(parse_args(&args("launch")).is_err());
  }

  #[test]
  fn overrides_do_not_touch_file_config() {
    let cfg = Config::default();
    let globals = GlobalOptions {
      remote: Some("https://cif.example.org".to_string()),
      token: Some("abc".to_string()),
      verbose: true,
      ..GlobalOptions::default()
    };
    let effective = apply_overrides(&cfg, &globals);
    assert_eq!(effective.client.remote, "https://cif.example.org");
    assert_eq!(effective.client.token, "abc");
    assert!(effective.client.verbose);
    assert_eq!(cfg, Config::default());
  }

  #[test]
  fn records_render_as_aligned_lines() {
    let mut r = NormalizedRecord::new();
    r.insert("Indicator", FieldValue::Text("example.com".to_string()));
    r.insert("TLP", FieldValue::Text("green".to_string()));

    assert_eq!(
      render_item(&Normalized::Record(r)),
      "Indicator : example.com\nTLP       : green"
    );
    assert_eq!(render_item(&Normalized::Scalar(Scalar::Integer(3))), "3");
    assert_eq!(render_item(&Normalized::Boolean(false)), "false");
  }

  #[test]
  fn token_mask_keeps_only_tail() {
    assert_eq!(mask_token(""), "(not set)");
    assert_eq!(mask_token("short"), "*****");
    assert_eq!(mask_token("0123456789abcdef"), "****cdef");
  }
}
