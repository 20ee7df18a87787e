/// Shell commands and "did you mean" suggestions

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All commands understood by the interactive shell
pub const COMMANDS: &[Command] = &[
  Command {
    name: "posts",
    aliases: &["p", "post"],
    usage: "posts list|next|prev|show|create|edit|delete ...",
    description: "Browse, search and edit posts",
  },
  Command {
    name: "comments",
    aliases: &["c", "comment"],
    usage: "comments list|add|edit|delete <post> ...",
    description: "Read and write comments on a post",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "Show available commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit postboard",
  },
];

/// Resolve a word typed at the prompt to a command, by name or alias.
pub fn resolve(input: &str) -> Option<&'static Command> {
  let input_lower = input.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == input_lower || cmd.aliases.contains(&input_lower.as_str()))
}

/// Get suggestions for a (possibly partial or misspelled) command
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
    } else if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
    } else if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
    } else if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    } else if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    } else if input_lower.starts_with(cmd.name) {
      // Extra characters typed after a full name ("postss")
      matches.push((cmd, 5));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}
