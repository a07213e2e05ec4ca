//! Text functions
//!
//! Positions and lengths count characters, not bytes.

use sheetcalc_core::CellError;

use super::criteria::wildcard_finder;
use super::{
    flatten, is_omitted, number, number_or, scalar, text, CalcResult, FunctionCategory,
    FunctionDescriptor, FunctionRegistry,
};
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::{parse_number_text, FormulaValue};

/// Longest text a function may produce
pub const MAX_TEXT_LEN: usize = 32_767;

pub(crate) fn register(r: &mut FunctionRegistry) {
    let txt = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Text);

    r.add(txt("LEN").args(1, 1).scalar(fn_len).help("en", "Number of characters in a text"));
    r.add(txt("LEFT").args(1, 2).scalar(fn_left).help("en", "First characters of a text"));
    r.add(txt("RIGHT").args(1, 2).scalar(fn_right).help("en", "Last characters of a text"));
    r.add(txt("MID").args(3, 3).scalar(fn_mid).help("en", "Characters from the middle of a text"));
    r.add(txt("LOWER").args(1, 1).scalar(fn_lower).help("en", "Converts text to lower case"));
    r.add(txt("UPPER").args(1, 1).scalar(fn_upper).help("en", "Converts text to upper case"));
    r.add(txt("PROPER").args(1, 1).scalar(fn_proper).help("en", "Capitalizes the first letter of each word"));
    r.add(txt("TRIM").args(1, 1).scalar(fn_trim).help("en", "Removes extra spaces"));
    r.add(txt("CONCAT").repeatable(1).native(fn_concat).help("en", "Joins texts, ranges included"));
    r.add(txt("CONCATENATE").repeatable(1).scalar(fn_concatenate).help("en", "Joins texts"));
    r.add(txt("TEXTJOIN").repeatable(3).native(fn_textjoin).help("en", "Joins texts with a delimiter"));
    r.add(txt("FIND").args(2, 3).scalar(fn_find).help("en", "Position of one text in another, case-sensitive"));
    r.add(txt("SEARCH").args(2, 3).scalar(fn_search).help("en", "Position of one text in another, case-insensitive with wildcards"));
    r.add(txt("SUBSTITUTE").args(3, 4).scalar(fn_substitute).help("en", "Replaces occurrences of a text"));
    r.add(txt("REPT").args(2, 2).scalar(fn_rept).help("en", "Repeats a text"));
    r.add(txt("EXACT").args(2, 2).scalar(fn_exact).help("en", "Whether two texts are identical"));
    r.add(txt("VALUE").args(1, 1).scalar(fn_value).help("en", "Converts text to a number"));
    r.add(txt("CHAR").args(1, 1).scalar(fn_char).help("en", "Character for a code from 1 to 255"));
    r.add(txt("CODE").args(1, 1).scalar(fn_code).help("en", "Code of the first character"));
    r.add(txt("T").args(1, 1).scalar(fn_t).help("en", "The value if it is text, empty text otherwise"));
}

fn text_result(s: String) -> CalcResult {
    if s.chars().count() > MAX_TEXT_LEN {
        return Err(CellError::Value);
    }
    Ok(FormulaValue::String(s))
}

/// Character count argument: omitted is `default`, negative is `#VALUE!`
fn count_arg(args: &[Operand], index: usize, default: f64) -> Result<usize, CellError> {
    let n = number_or(args, index, default)?.trunc();
    if n < 0.0 {
        return Err(CellError::Value);
    }
    Ok(n.min(usize::MAX as f64) as usize)
}

/// LEN(text)
pub fn fn_len(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(text(args, 0)?.chars().count() as f64))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let n = count_arg(args, 1, 1.0)?;
    Ok(FormulaValue::String(s.chars().take(n).collect()))
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let n = count_arg(args, 1, 1.0)?;
    let len = s.chars().count();
    Ok(FormulaValue::String(s.chars().skip(len.saturating_sub(n)).collect()))
}

/// MID(text, start_num, num_chars)
pub fn fn_mid(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let start = number(args, 1)?.trunc();
    if start < 1.0 {
        return Err(CellError::Value);
    }
    let n = count_arg(args, 2, 0.0)?;
    let skip = (start - 1.0).min(usize::MAX as f64) as usize;
    Ok(FormulaValue::String(s.chars().skip(skip).take(n).collect()))
}

/// LOWER(text)
pub fn fn_lower(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::String(text(args, 0)?.to_lowercase()))
}

/// UPPER(text)
pub fn fn_upper(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::String(text(args, 0)?.to_uppercase()))
}

/// PROPER(text) - Upper-cases letters that follow a non-letter, lower-cases the rest
pub fn fn_proper(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let mut out = String::with_capacity(s.len());
    let mut after_letter = false;
    for c in s.chars() {
        if after_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        after_letter = c.is_alphabetic();
    }
    Ok(FormulaValue::String(out))
}

/// TRIM(text) - Strips spaces at both ends and collapses inner runs to one
pub fn fn_trim(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let words: Vec<&str> = s.split(' ').filter(|w| !w.is_empty()).collect();
    Ok(FormulaValue::String(words.join(" ")))
}

/// CONCAT(text1, [text2], ...)
pub fn fn_concat(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let mut out = String::new();
    for flat in flatten(args, ctx) {
        out.push_str(&flat.value.to_text()?);
    }
    text_result(out)
}

/// CONCATENATE(text1, [text2], ...)
pub fn fn_concatenate(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let mut out = String::new();
    for i in 0..args.len() {
        out.push_str(&text(args, i)?);
    }
    text_result(out)
}

/// TEXTJOIN(delimiter, ignore_empty, text1, ...)
pub fn fn_textjoin(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let delimiter = ctx.value(&args[0]).to_text()?;
    let ignore_empty = ctx.value(&args[1]).to_bool()?;
    let mut parts = Vec::new();
    for flat in flatten(&args[2..], ctx) {
        let part = flat.value.to_text()?;
        if !(ignore_empty && part.is_empty()) {
            parts.push(part);
        }
    }
    text_result(parts.join(&delimiter))
}

/// Start position argument (1-based) converted to a char index within `len` chars
fn start_arg(args: &[Operand], index: usize, len: usize) -> Result<usize, CellError> {
    let start = number_or(args, index, 1.0)?.trunc();
    if start < 1.0 || start > (len + 1) as f64 {
        return Err(CellError::Value);
    }
    Ok(start as usize - 1)
}

fn byte_to_char_index(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

/// FIND(find_text, within_text, [start_num])
pub fn fn_find(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let needle = text(args, 0)?;
    let haystack = text(args, 1)?;
    let start = start_arg(args, 2, haystack.chars().count())?;
    let tail: String = haystack.chars().skip(start).collect();
    let found = tail.find(&needle).ok_or(CellError::Value)?;
    Ok(FormulaValue::Number((start + byte_to_char_index(&tail, found) + 1) as f64))
}

/// SEARCH(find_text, within_text, [start_num])
pub fn fn_search(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let needle = text(args, 0)?;
    let haystack = text(args, 1)?;
    let start = start_arg(args, 2, haystack.chars().count())?;
    let tail: String = haystack.chars().skip(start).collect::<String>().to_lowercase();
    let found = match wildcard_finder(&needle) {
        Some(re) => re.find(&tail).map(|m| m.start()),
        None => tail.find(&needle.to_lowercase()),
    };
    let found = found.ok_or(CellError::Value)?;
    Ok(FormulaValue::Number((start + byte_to_char_index(&tail, found) + 1) as f64))
}

/// SUBSTITUTE(text, old_text, new_text, [instance_num])
pub fn fn_substitute(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let old = text(args, 1)?;
    let new = text(args, 2)?;
    if old.is_empty() {
        return Ok(FormulaValue::String(s));
    }
    if is_omitted(args, 3) {
        return text_result(s.replace(&old, &new));
    }
    let instance = number(args, 3)?.trunc();
    if instance < 1.0 {
        return Err(CellError::Value);
    }
    let target = instance as usize;
    match s.match_indices(&old).nth(target - 1) {
        Some((at, _)) => {
            let mut out = String::with_capacity(s.len() + new.len());
            out.push_str(&s[..at]);
            out.push_str(&new);
            out.push_str(&s[at + old.len()..]);
            text_result(out)
        }
        None => Ok(FormulaValue::String(s)),
    }
}

/// REPT(text, number_times)
pub fn fn_rept(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let times = count_arg(args, 1, 0.0)?;
    if s.chars().count().saturating_mul(times) > MAX_TEXT_LEN {
        return Err(CellError::Value);
    }
    Ok(FormulaValue::String(s.repeat(times)))
}

/// EXACT(text1, text2)
pub fn fn_exact(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Boolean(text(args, 0)? == text(args, 1)?))
}

/// VALUE(text)
pub fn fn_value(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    match scalar(args, 0) {
        FormulaValue::Number(n) => Ok(FormulaValue::Number(*n)),
        FormulaValue::Empty => Ok(FormulaValue::Number(0.0)),
        FormulaValue::Error(e) => Err(*e),
        FormulaValue::String(s) => parse_number_text(s)
            .map(FormulaValue::Number)
            .ok_or(CellError::Value),
        _ => Err(CellError::Value),
    }
}

/// CHAR(number) - Latin-1 character for codes 1 to 255
pub fn fn_char(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let code = number(args, 0)?.trunc();
    if !(1.0..=255.0).contains(&code) {
        return Err(CellError::Value);
    }
    Ok(FormulaValue::String(char::from(code as u8).to_string()))
}

/// CODE(text) - Code point of the first character
pub fn fn_code(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let s = text(args, 0)?;
    let first = s.chars().next().ok_or(CellError::Value)?;
    Ok(FormulaValue::Number(f64::from(u32::from(first))))
}

/// T(value)
pub fn fn_t(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    match scalar(args, 0) {
        FormulaValue::String(s) => Ok(FormulaValue::String(s.clone())),
        FormulaValue::Error(e) => Err(*e),
        _ => Ok(FormulaValue::String(String::new())),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{eval, eval_on, num, sheet_with, text};
    use crate::value::FormulaValue;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::CellError;

    #[test]
    fn test_slicing() {
        assert_eq!(eval("=LEFT(\"héllo\", 2)"), text("hé"));
        assert_eq!(eval("=LEFT(\"abc\")"), text("a"));
        assert_eq!(eval("=RIGHT(\"abc\", 5)"), text("abc"));
        assert_eq!(eval("=MID(\"spreadsheet\", 7, 5)"), text("sheet"));
        assert_eq!(eval("=MID(\"abc\", 0, 1)"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=LEFT(\"abc\", -1)"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=LEN(\"héllo\")"), num(5.0));
        assert_eq!(eval("=LEN(12.5)"), num(4.0));
    }

    #[test]
    fn test_case_and_spacing() {
        assert_eq!(eval("=PROPER(\"hello wORLD o'neil\")"), text("Hello World O'Neil"));
        assert_eq!(eval("=TRIM(\"  a   b  \")"), text("a b"));
        assert_eq!(eval("=UPPER(\"abc\")"), text("ABC"));
    }

    #[test]
    fn test_joining() {
        let s = sheet_with(&[("A1", "x".into()), ("A3", 2.0.into())]);
        assert_eq!(eval_on(&s, "=CONCAT(A1:A3, \"!\")"), text("x2!"));
        assert_eq!(eval_on(&s, "=TEXTJOIN(\"-\", TRUE, A1:A3, \"z\")"), text("x-2-z"));
        assert_eq!(eval_on(&s, "=TEXTJOIN(\"-\", FALSE, A1:A3)"), text("x--2"));
        assert_eq!(eval("=CONCATENATE(\"a\", 1, TRUE)"), text("a1TRUE"));
        assert_eq!(eval("=CONCAT(\"a\", 1/0)"), FormulaValue::Error(CellError::Div0));
    }

    #[test]
    fn test_find_and_search() {
        assert_eq!(eval("=FIND(\"b\", \"abcb\")"), num(2.0));
        assert_eq!(eval("=FIND(\"b\", \"abcb\", 3)"), num(4.0));
        assert_eq!(eval("=FIND(\"B\", \"abc\")"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=SEARCH(\"B\", \"abc\")"), num(2.0));
        assert_eq!(eval("=SEARCH(\"b?d\", \"abcd\")"), num(2.0));
        assert_eq!(eval("=FIND(\"\", \"abc\")"), num(1.0));
        assert_eq!(eval("=FIND(\"a\", \"abc\", 9)"), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_substitute_and_rept() {
        assert_eq!(eval("=SUBSTITUTE(\"a-b-c\", \"-\", \"+\")"), text("a+b+c"));
        assert_eq!(eval("=SUBSTITUTE(\"a-b-c\", \"-\", \"+\", 2)"), text("a-b+c"));
        assert_eq!(eval("=SUBSTITUTE(\"abc\", \"\", \"x\")"), text("abc"));
        assert_eq!(eval("=REPT(\"ab\", 3)"), text("ababab"));
        assert_eq!(eval("=REPT(\"ab\", 20000)"), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval("=VALUE(\" 12.5 \")"), num(12.5));
        assert_eq!(eval("=VALUE(\"5%\")"), num(0.05));
        assert_eq!(eval("=VALUE(\"abc\")"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=CHAR(65)"), text("A"));
        assert_eq!(eval("=CHAR(0)"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=CODE(\"A\")"), num(65.0));
        assert_eq!(eval("=T(1)"), text(""));
        assert_eq!(eval("=EXACT(\"a\", \"A\")"), FormulaValue::Boolean(false));
    }
}
