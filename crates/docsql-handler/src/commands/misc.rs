use bson::{Document, doc};

use super::{COMMANDS, Reply};
use crate::params::{Field, Kind, Modifier, extract_params};

const PING: &[Field] = &[
    Field::new("ping", Kind::Any),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
];

pub(super) fn ping(command: &Document) -> Reply {
    extract_params(command, "ping", PING)?;
    Ok(doc! { "ok": 1.0 })
}

const LIST_COMMANDS: &[Field] = &[
    Field::new("listCommands", Kind::Any),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
];

pub(super) fn list_commands(command: &Document) -> Reply {
    extract_params(command, "listCommands", LIST_COMMANDS)?;

    let mut commands = Document::new();
    for (name, help) in COMMANDS {
        commands.insert(*name, doc! { "help": *help });
    }
    Ok(doc! { "commands": commands, "ok": 1.0 })
}
