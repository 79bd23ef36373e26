//! Op-token recognition: canonical spellings plus the small set of aliases
//! carried over from the original tooling (§4.3, §GLOSSARY).

use svpatch_types::CommandKind;

const ALIASES: &[(&str, CommandKind)] = &[
    ("ASSERT_EXISTS", CommandKind::AssertFileExists),
    ("ASSERT_NOT_EXISTS", CommandKind::AssertFileNotExists),
    ("ASSERT_MATCH", CommandKind::AssertRegex),
    ("ASSERT_NOT_MATCH", CommandKind::AssertNotRegex),
    ("ASSERT_COUNT", CommandKind::AssertRegexCount),
    ("SCAN", CommandKind::ScanFile),
];

const ALL_KINDS: &[CommandKind] = &[
    CommandKind::CreateFile,
    CommandKind::WriteFile,
    CommandKind::UpsertFile,
    CommandKind::DeleteFile,
    CommandKind::MoveFile,
    CommandKind::CopyFile,
    CommandKind::AssertFileExists,
    CommandKind::AssertFileNotExists,
    CommandKind::AssertRegex,
    CommandKind::AssertNotRegex,
    CommandKind::AssertRegexCount,
    CommandKind::InsertBeforeRegex,
    CommandKind::InsertAfterRegex,
    CommandKind::ReplaceRegex,
    CommandKind::ReplaceRegexFirst,
    CommandKind::DeleteRegex,
    CommandKind::ReplaceBlock,
    CommandKind::ScanFile,
    CommandKind::PatchRegex,
];

/// Resolve an uppercased op token (canonical or alias) to its `CommandKind`.
pub fn alias_to_kind(op_upper: &str) -> Option<CommandKind> {
    if let Some(kind) = ALL_KINDS.iter().find(|k| k.canonical_name() == op_upper) {
        return Some(*kind);
    }
    ALIASES
        .iter()
        .find(|(name, _)| *name == op_upper)
        .map(|(_, kind)| *kind)
}

/// Whether an uppercased token is any recognized op spelling (canonical or
/// alias). Used to decide where an implicit multiline payload ends.
pub fn is_known_op(op_upper: &str) -> bool {
    alias_to_kind(op_upper).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for kind in ALL_KINDS {
            assert_eq!(alias_to_kind(kind.canonical_name()), Some(*kind));
        }
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(alias_to_kind("ASSERT_EXISTS"), Some(CommandKind::AssertFileExists));
        assert_eq!(alias_to_kind("SCAN"), Some(CommandKind::ScanFile));
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        assert_eq!(alias_to_kind("FROBNICATE"), None);
        assert!(!is_known_op("FROBNICATE"));
    }
}
