//! Property tests for room code validation.

use pairsig_proto::RoomCode;
use proptest::prelude::*;

proptest! {
    /// Every four-ASCII-digit string parses, and the parsed code
    /// preserves the input exactly.
    #[test]
    fn all_four_digit_strings_accepted(code in "[0-9]{4}") {
        let parsed = RoomCode::parse(&code);
        prop_assert!(parsed.is_ok());
        let parsed = parsed.unwrap();
        prop_assert_eq!(parsed.as_str(), code.as_str());
    }

    /// Strings of the wrong length never parse, digits or not.
    #[test]
    fn wrong_length_rejected(code in "[0-9]{0,3}|[0-9]{5,8}") {
        prop_assert!(RoomCode::parse(&code).is_err());
    }

    /// A single non-digit anywhere poisons an otherwise valid code.
    #[test]
    fn any_non_digit_rejected(
        prefix in "[0-9]{0,3}",
        bad in "[^0-9]",
    ) {
        let mut code = prefix.clone();
        code.push_str(&bad);
        while code.chars().count() < 4 {
            code.push('0');
        }
        prop_assert!(RoomCode::parse(&code).is_err());
    }

    /// Arbitrary strings only parse when they are exactly four digits.
    #[test]
    fn parse_agrees_with_format(code in ".*") {
        let expected = code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit());
        prop_assert_eq!(RoomCode::parse(&code).is_ok(), expected);
    }
}
