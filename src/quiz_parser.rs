//! Best-effort extraction of multiple-choice questions from free LLM text.
//!
//! Used when the model ignores the requested JSON format. The output is lossy:
//! anything that does not look like a numbered question with lettered options is
//! either skipped or filled with placeholders.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::models::GeneratedQuestion;

/// Blocks shorter than this (in characters) are treated as noise
const MIN_BLOCK_CHARS: usize = 10;

static BLOCK_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Q\d+|Question \d+|ข้อ\s*\d+)\s*[:.\-)]?\s*|\d+\.\s+")
        .expect("block split pattern is valid")
});

static ANSWER_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)(?:Answer|Correct answer|เฉลย|คำตอบ)\s*[:.\-]?\s*([A-D])")
            .expect("answer pattern is valid"),
        Regex::new(r"(?i)ตอบ\s*[:.\-]?\s*([A-D])").expect("short answer pattern is valid"),
    ]
});

static EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:Explanation|Reason|Because|เพราะว่า|อธิบาย)\s*[:.\-]?\s*(.*)")
        .expect("explanation pattern is valid")
});

/// One option letter, the pattern that opens it and the letters that close it
struct OptionRule {
    letter: char,
    prefix: Regex,
    /// A newline followed by one of these letters ends the option; `None` means any newline does
    stop_letters: Option<&'static str>,
}

static OPTION_RULES: LazyLock<[OptionRule; 4]> = LazyLock::new(|| {
    let rule = |letter: char, stop_letters: Option<&'static str>| OptionRule {
        letter,
        prefix: Regex::new(&format!(r"(?i){}\s*[:.)\-]\s*", letter)).expect("option pattern is valid"),
        stop_letters,
    };
    [
        rule('A', Some("BCD")),
        rule('B', Some("CD")),
        rule('C', Some("D")),
        rule('D', None),
    ]
});

/// Split LLM free text into question records.
///
/// Blocks are delimited by `Q1`, `Question 1`, `ข้อ 1` or `1.` markers. Within a
/// block the first line is the question, `A)`..`D)` (or `A.`, `A:`, `A-`) start the
/// options, and `Answer:`/`เฉลย:` and `Explanation:`/`อธิบาย:` carry the key and
/// the rationale. Missing options become `ตัวเลือก X`, a missing key becomes `A`.
pub fn parse_quiz_text(llm_text: &str) -> Vec<GeneratedQuestion> {
    let mut quizzes = Vec::new();

    for raw_block in BLOCK_SPLIT.split(llm_text) {
        let block = raw_block.trim();
        if block.is_empty() || block.chars().count() < MIN_BLOCK_CHARS {
            continue;
        }

        let question = block.lines().next().unwrap_or_default().trim();
        if question.is_empty() {
            continue;
        }

        let [option_a, option_b, option_c, option_d] = OPTION_RULES.each_ref().map(|rule| {
            extract_option(block, rule).unwrap_or_else(|| format!("ตัวเลือก {}", rule.letter))
        });

        let correct_answer = ANSWER_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(block))
            .map(|captures| captures[1].trim().to_uppercase())
            .unwrap_or_else(|| "A".to_string());

        let explanation = EXPLANATION
            .captures(block)
            .map(|captures| captures[1].trim().to_string())
            .unwrap_or_default();

        debug!(
            question = %question.chars().take(60).collect::<String>(),
            correct_answer = %correct_answer,
            "Parsed quiz block from free text"
        );

        quizzes.push(GeneratedQuestion {
            question: question.to_string(),
            option_a,
            option_b,
            option_c,
            option_d,
            correct_answer,
            explanation,
        });
    }

    quizzes
}

/// Find the leftmost opener for the rule's letter and take the shortest text after it
/// that reaches a terminator.
fn extract_option(block: &str, rule: &OptionRule) -> Option<String> {
    let opener = rule.prefix.find(block)?;
    let rest = &block[opener.end()..];

    let end = rest
        .match_indices('\n')
        .map(|(index, _)| index)
        .find(|&index| {
            let next = rest[index + 1..].chars().next();
            match (rule.stop_letters, next) {
                (None, _) => true,
                (Some(_), Some('\n')) => true,
                (Some(letters), Some(c)) => letters.contains(c.to_ascii_uppercase()),
                (Some(_), None) => false,
            }
        })
        .unwrap_or(rest.len());

    Some(rest[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_english_numbered_questions() {
        let text = "Q1: What is the capital of France?\n\
                    A) Berlin\nB) Paris\nC) Rome\nD) Madrid\n\
                    Answer: B\nExplanation: Paris is the capital.\n\n\
                    Q2: Which planet is known as the red planet?\n\
                    A) Venus\nB) Jupiter\nC) Mars\nD) Saturn\n\
                    Answer: C\nExplanation: Iron oxide gives Mars its color.";

        let parsed = parse_quiz_text(text);
        assert_eq!(parsed.len(), 2);

        assert_eq!(parsed[0].question, "What is the capital of France?");
        assert_eq!(parsed[0].option_a, "Berlin");
        assert_eq!(parsed[0].option_b, "Paris");
        assert_eq!(parsed[0].option_c, "Rome");
        assert_eq!(parsed[0].option_d, "Madrid");
        assert_eq!(parsed[0].correct_answer, "B");
        assert_eq!(parsed[0].explanation, "Paris is the capital.");

        assert_eq!(parsed[1].question, "Which planet is known as the red planet?");
        assert_eq!(parsed[1].option_c, "Mars");
        assert_eq!(parsed[1].correct_answer, "C");
        assert_eq!(parsed[1].explanation, "Iron oxide gives Mars its color.");
    }

    #[test]
    fn test_parses_thai_markers() {
        let text = "ข้อ 1. ประเทศไทยมีกี่จังหวัด\nA. 75\nB. 76\nC. 77\nD. 78\nเฉลย: C\nอธิบาย: ปัจจุบันมี 77 จังหวัด";

        let parsed = parse_quiz_text(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].question, "ประเทศไทยมีกี่จังหวัด");
        assert_eq!(parsed[0].option_a, "75");
        assert_eq!(parsed[0].option_b, "76");
        assert_eq!(parsed[0].option_c, "77");
        assert_eq!(parsed[0].option_d, "78");
        assert_eq!(parsed[0].correct_answer, "C");
        assert_eq!(parsed[0].explanation, "ปัจจุบันมี 77 จังหวัด");
    }

    #[test]
    fn test_missing_fields_fall_back_to_placeholders() {
        let parsed = parse_quiz_text("1. What does CPU stand for in computing terms?");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].option_a, "ตัวเลือก A");
        assert_eq!(parsed[0].option_b, "ตัวเลือก B");
        assert_eq!(parsed[0].option_c, "ตัวเลือก C");
        assert_eq!(parsed[0].option_d, "ตัวเลือก D");
        assert_eq!(parsed[0].correct_answer, "A");
        assert_eq!(parsed[0].explanation, "");
    }

    #[test]
    fn test_short_blocks_are_skipped() {
        let text = "Quiz:\nQ1: Hi\nQ2: Which gas do plants absorb?\nA) Oxygen\nB) Carbon dioxide\nC) Helium\nD) Neon\nAnswer: b";
        let parsed = parse_quiz_text(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].question, "Which gas do plants absorb?");
        assert_eq!(parsed[0].option_b, "Carbon dioxide");
        assert_eq!(parsed[0].correct_answer, "B");
    }

    #[test]
    fn test_option_text_spans_lines_until_next_letter() {
        let text = "Question 1: Pick the definition of latency\n\
                    A) time taken\nfor a round trip\nB) bytes per second\nC) packet loss\nD) jitter\nคำตอบ: A";
        let parsed = parse_quiz_text(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].option_a, "time taken\nfor a round trip");
        assert_eq!(parsed[0].option_b, "bytes per second");
        assert_eq!(parsed[0].correct_answer, "A");
    }

    #[test]
    fn test_short_thai_answer_marker() {
        let text = "ข้อ 1 สีของท้องฟ้าตอนกลางวันคือสีอะไร\nA) แดง\nB) ฟ้า\nC) เขียว\nD) ดำ\nตอบ B";
        let parsed = parse_quiz_text(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].correct_answer, "B");
        assert_eq!(parsed[0].option_d, "ดำ");
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_quiz_text("").is_empty());
        assert!(parse_quiz_text("   \n  ").is_empty());
    }
}
