// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{PResult, Span, cut_with};
use crate::errors::ParseSingleError;
use winnow::{
    Parser,
    combinator::{alt, opt, trace},
    stream::{Location, Stream},
    token::{any, one_of, take_till},
};

fn parse_escaped_char(input: &mut Span<'_>) -> PResult<Option<char>> {
    trace(
        "parse_escaped_char",
        opt(alt((
            'n'.value('\n'),
            't'.value('\t'),
            '\\'.value('\\'),
            '"'.value('"'),
            '\''.value('\''),
        ))),
    )
    .parse_next(input)
}

/// Parses a single- or double-quoted string literal. Strings can't span lines.
pub(super) fn parse_string(input: &mut Span<'_>) -> PResult<String> {
    trace("parse_string", |input: &mut Span<'_>| {
        let start = input.current_token_start();
        let quote = one_of(['"', '\'']).parse_next(input)?;
        let mut string = String::new();

        loop {
            let literal = take_till(0.., (quote, '\\', '\n')).parse_next(input)?;
            string.push_str(literal);

            let escape_start = input.current_token_start();
            match opt(any).parse_next(input)? {
                Some(c) if c == quote => return Ok(string),
                Some('\\') => match parse_escaped_char(input)? {
                    Some(c) => string.push(c),
                    None => {
                        // Cover the backslash and the following character, if any.
                        let len = 1 + input.eof_offset().min(1);
                        return cut_with(
                            input,
                            ParseSingleError::InvalidEscape((escape_start, len).into()),
                        );
                    }
                },
                _ => {
                    return cut_with(input, ParseSingleError::UnterminatedString((start, 1).into()));
                }
            }
        }
    })
    .parse_next(input)
}
