//! Name normalization: sanitization, ASCII transliteration, and the street
//! suffix abbreviation dictionary applied to searchable names.

/// Attribute strings may not contain the reserved `|` byte and are truncated
/// at 255 bytes (on a char boundary).
pub const NAME_MAX_BYTES: usize = 255;

pub fn sanitize(raw: &str) -> String {
    let mut s: String = raw.trim().chars().filter(|&c| c != '|').collect();
    if s.len() > NAME_MAX_BYTES {
        let mut cut = NAME_MAX_BYTES;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// Best-effort UTF-8 to ASCII folding for the Latin ranges seen in OSM names.
/// Characters with no mapping are dropped.
pub fn transliterate(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        let folded: &str = match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => "a",
            'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' | 'Ā' => "A",
            'é' | 'è' | 'ê' | 'ë' | 'ē' => "e",
            'É' | 'È' | 'Ê' | 'Ë' | 'Ē' => "E",
            'í' | 'ì' | 'î' | 'ï' | 'ī' => "i",
            'Í' | 'Ì' | 'Î' | 'Ï' | 'Ī' => "I",
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ō' => "o",
            'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' | 'Ō' => "O",
            'ú' | 'ù' | 'û' | 'ü' | 'ū' => "u",
            'Ú' | 'Ù' | 'Û' | 'Ü' | 'Ū' => "U",
            'ñ' => "n",
            'Ñ' => "N",
            'ç' => "c",
            'Ç' => "C",
            'ß' => "ss",
            'æ' => "ae",
            'Æ' => "AE",
            'ø' => "o",
            'Ø' => "O",
            'œ' => "oe",
            'Œ' => "OE",
            'ý' | 'ÿ' => "y",
            'Ý' => "Y",
            '’' | '‘' => "'",
            '“' | '”' => "\"",
            '–' | '—' => "-",
            _ => "",
        };
        out.push_str(folded);
    }
    out
}

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("Street", "St"),
    ("Avenue", "Ave"),
    ("Boulevard", "Blvd"),
    ("Road", "Rd"),
    ("Drive", "Dr"),
    ("Lane", "Ln"),
    ("Court", "Ct"),
    ("Place", "Pl"),
    ("Circle", "Cir"),
    ("Highway", "Hwy"),
    ("Parkway", "Pkwy"),
    ("Trail", "Trl"),
    ("Terrace", "Ter"),
    ("Crossing", "Xing"),
    ("Square", "Sq"),
    ("Mount", "Mt"),
    ("Mountain", "Mtn"),
    ("Fort", "Ft"),
    ("North", "N"),
    ("South", "S"),
    ("East", "E"),
    ("West", "W"),
    ("Northeast", "NE"),
    ("Northwest", "NW"),
    ("Southeast", "SE"),
    ("Southwest", "SW"),
];

fn abbreviate_word(word: &str) -> &str {
    for &(long, short) in ABBREVIATIONS {
        if word == long {
            return short;
        }
    }
    word
}

/// The abbreviated ASCII rendition of a name, or `None` when abbreviation
/// and transliteration change nothing.
pub fn abbreviation(name: &str) -> Option<String> {
    let ascii = transliterate(name);
    let abbreviated: Vec<&str> = ascii.split_whitespace().map(abbreviate_word).collect();
    let out = abbreviated.join(" ");
    if out == name {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_pipe_and_truncates() {
        assert_eq!(sanitize(" Main|Street "), "MainStreet");
        let long = "x".repeat(300);
        assert_eq!(sanitize(&long).len(), NAME_MAX_BYTES);
        // Truncation never splits a multibyte char.
        let wide = "é".repeat(200);
        let cut = sanitize(&wide);
        assert!(cut.len() <= NAME_MAX_BYTES);
        assert!(std::str::from_utf8(cut.as_bytes()).is_ok());
    }

    #[test]
    fn transliterate_folds_latin() {
        assert_eq!(transliterate("Cañon Boulevard"), "Canon Boulevard");
        assert_eq!(transliterate("Škofja"), "kofja");
    }

    #[test]
    fn abbreviation_only_when_different() {
        assert_eq!(abbreviation("Main Street").as_deref(), Some("Main St"));
        assert_eq!(
            abbreviation("South Boulder Road").as_deref(),
            Some("S Boulder Rd")
        );
        assert_eq!(abbreviation("Pearl Mall"), None);
    }
}
