/// Outcome of script-based language detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub lang: &'static str,
    pub is_rtl: bool,
}

/// Fraction of non-whitespace code points that must be Arabic-script for a
/// text to be treated as RTL.
const RTL_THRESHOLD: f64 = 0.2;

/// Fraction of Arabic-script code points that must be Farsi-specific for
/// the text to be classified `fa` rather than `ar`.
const FARSI_THRESHOLD: f64 = 0.1;

fn is_arabic_script(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
}

/// Letters used in Farsi but absent from standard Arabic: pe, che, zhe,
/// gaf, and the Farsi yeh.
fn is_farsi_specific(c: char) -> bool {
    matches!(
        c,
        '\u{067E}' | '\u{0686}' | '\u{0698}' | '\u{06AF}' | '\u{06CC}'
    )
}

/// Classify a text by counting code-point membership. English/LTR is the
/// fallback when the Arabic-script fraction stays under the threshold.
pub fn detect(text: &str) -> Detection {
    let mut non_whitespace = 0usize;
    let mut arabic = 0usize;
    let mut farsi = 0usize;

    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        non_whitespace += 1;
        if is_arabic_script(c) {
            arabic += 1;
            if is_farsi_specific(c) {
                farsi += 1;
            }
        }
    }

    if non_whitespace == 0 {
        return Detection {
            lang: "en",
            is_rtl: false,
        };
    }

    #[allow(clippy::cast_precision_loss)]
    let arabic_fraction = arabic as f64 / non_whitespace as f64;
    if arabic_fraction < RTL_THRESHOLD {
        return Detection {
            lang: "en",
            is_rtl: false,
        };
    }

    #[allow(clippy::cast_precision_loss)]
    let farsi_fraction = farsi as f64 / arabic as f64;
    Detection {
        lang: if farsi_fraction > FARSI_THRESHOLD {
            "fa"
        } else {
            "ar"
        },
        is_rtl: true,
    }
}

/// Resolve the stored language for a document. Content detection is
/// authoritative for non-English scripts; it corrects historically
/// mis-tagged frontmatter. A frontmatter tag only survives when the body
/// does not read as RTL.
pub fn resolve_language(frontmatter_lang: Option<&str>, body: &str) -> (String, bool) {
    let detected = detect(body);
    if detected.is_rtl {
        return (detected.lang.to_string(), true);
    }
    match frontmatter_lang {
        Some(lang) if !lang.trim().is_empty() => (lang.trim().to_lowercase(), false),
        _ => (detected.lang.to_string(), false),
    }
}
