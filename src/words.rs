// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Number words as printed on receipts ("Rupees One Thousand Five Hundred Only").
//!
//! Understands units, teens, tens, `hundred`, and both the Indian
//! (`thousand`, `lakh`, `crore`) and international (`million`, `billion`)
//! scales. `and` is ignored; any other word rejects the phrase.

fn small(word: &str) -> Option<u64> {
    let value = match word {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" | "fourty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        _ => return None,
    };
    Some(value)
}

fn scale(word: &str) -> Option<u64> {
    match word {
        "thousand" => Some(1_000),
        "lakh" | "lakhs" | "lac" | "lacs" => Some(100_000),
        "million" | "millions" => Some(1_000_000),
        "crore" | "crores" => Some(10_000_000),
        "billion" | "billions" => Some(1_000_000_000),
        _ => None,
    }
}

/// Parses a phrase of number words. Returns `None` if the phrase contains no
/// number word, an unknown word, or overflows.
pub fn parse_number_words(phrase: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut seen = false;

    let words = phrase
        .split(|c: char| c.is_whitespace() || c == '-' || c == ',')
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase);

    for word in words {
        if word == "and" {
            continue;
        }
        if let Some(value) = small(&word) {
            current = current.checked_add(value)?;
        } else if word == "hundred" || word == "hundreds" {
            current = current.max(1).checked_mul(100)?;
        } else if let Some(multiplier) = scale(&word) {
            total = total.checked_add(current.max(1).checked_mul(multiplier)?)?;
            current = 0;
        } else {
            return None;
        }
        seen = true;
    }

    if !seen {
        return None;
    }
    total.checked_add(current)
}
