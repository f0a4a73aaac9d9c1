//! Parsing of interactive stdin lines.

use collabdocs_sync::CursorRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text, appended to the document
    Append(String),
    Insert { at: u32, text: String },
    Delete { at: u32, len: u32 },
    Select(CursorRange),
    Comment { range: CursorRange, text: String },
    Resolve(String),
    Comments,
    Who,
    Text,
    Name(String),
    Quit,
    Help,
}

pub const HELP: &str = "\
  <text>                   append text to the document
  /insert <at> <text>      insert text at a character offset
  /delete <at> <len>       delete characters
  /select <from> <to>      move the cursor or selection
  /comment <from> <to> <text>
  /resolve <comment-id>
  /comments  /who  /text
  /name <display name>
  /quit";

/// Parse one line. `Err` carries a usage message for the user.
pub fn parse(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Input::Append(line.to_string())));
    };

    let (command, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let input = match command {
        "insert" => {
            let (at, text) = split_number(args).ok_or("usage: /insert <at> <text>")?;
            Input::Insert {
                at,
                text: text.to_string(),
            }
        }
        "delete" => {
            let (at, rest) = split_number(args).ok_or("usage: /delete <at> <len>")?;
            let len = rest.trim().parse().map_err(|_| "usage: /delete <at> <len>")?;
            Input::Delete { at, len }
        }
        "select" => {
            let (from, rest) = split_number(args).ok_or("usage: /select <from> <to>")?;
            let to = rest.trim().parse().map_err(|_| "usage: /select <from> <to>")?;
            Input::Select(CursorRange::new(from, to))
        }
        "comment" => {
            let usage = "usage: /comment <from> <to> <text>";
            let (from, rest) = split_number(args).ok_or(usage)?;
            let (to, text) = split_number(rest).ok_or(usage)?;
            Input::Comment {
                range: CursorRange::new(from, to),
                text: text.to_string(),
            }
        }
        "resolve" if !args.trim().is_empty() => Input::Resolve(args.trim().to_string()),
        "resolve" => return Err("usage: /resolve <comment-id>".into()),
        "name" if !args.trim().is_empty() => Input::Name(args.trim().to_string()),
        "name" => return Err("usage: /name <display name>".into()),
        "comments" => Input::Comments,
        "who" => Input::Who,
        "text" => Input::Text,
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(input))
}

fn split_number(args: &str) -> Option<(u32, &str)> {
    let args = args.trim_start();
    let (number, rest) = args.split_once(' ').unwrap_or((args, ""));
    Some((number.parse().ok()?, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_appends() {
        assert_eq!(
            parse("hello world\n").unwrap(),
            Some(Input::Append("hello world".into()))
        );
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_edit_commands() {
        assert_eq!(
            parse("/insert 3 two words").unwrap(),
            Some(Input::Insert {
                at: 3,
                text: "two words".into()
            })
        );
        assert_eq!(
            parse("/delete 0 4").unwrap(),
            Some(Input::Delete { at: 0, len: 4 })
        );
        assert_eq!(
            parse("/select 2 9").unwrap(),
            Some(Input::Select(CursorRange::new(2, 9)))
        );
    }

    #[test]
    fn test_comment_command() {
        assert_eq!(
            parse("/comment 1 5 needs a source").unwrap(),
            Some(Input::Comment {
                range: CursorRange::new(1, 5),
                text: "needs a source".into()
            })
        );
        assert!(parse("/comment one 5 x").is_err());
    }

    #[test]
    fn test_bad_input_reports_usage() {
        assert!(parse("/delete 3").is_err());
        assert!(parse("/resolve").is_err());
        assert!(parse("/frobnicate").unwrap_err().contains("/frobnicate"));
    }
}
