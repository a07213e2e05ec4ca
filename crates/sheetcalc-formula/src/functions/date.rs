//! Date functions
//!
//! Dates are serial numbers: whole days since the epoch plus a fraction for the time.
//!
//! Notes:
//! - In the 1900 system serial 1 is 1900-01-01 and serial 0 is the fictional 1900-01-00.
//!   The historical leap-year bug is kept: serial 60 is 1900-02-29, a day that never
//!   existed, so every date from 1900-03-01 on is one higher than a plain day count.
//! - In the 1904 system serial 0 is 1904-01-01.

use chrono::{Datelike, Duration, Months, NaiveDate, Timelike};
use sheetcalc_core::CellError;

use super::{is_omitted, number, number_or, CalcResult, FunctionCategory, FunctionDescriptor, FunctionRegistry};
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::FormulaValue;

/// Serial of 9999-12-31 in the 1900 system
const MAX_SERIAL_1900: i64 = 2_958_465;
/// Days between the 1900 and 1904 epochs
const EPOCH_1904_OFFSET: i64 = 1_462;

pub(crate) fn register(r: &mut FunctionRegistry) {
    let date = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Date);

    r.add(date("DATE").args(3, 3).scalar(fn_date).help("en", "Serial number of a year, month and day"));
    r.add(date("YEAR").args(1, 1).scalar(fn_year).help("en", "Year of a date"));
    r.add(date("MONTH").args(1, 1).scalar(fn_month).help("en", "Month of a date, 1 to 12"));
    r.add(date("DAY").args(1, 1).scalar(fn_day).help("en", "Day of the month of a date"));
    r.add(date("WEEKDAY").args(1, 2).scalar(fn_weekday).help("en", "Day of the week of a date"));
    r.add(date("TODAY").args(0, 0).volatile().scalar(fn_today).help("en", "Serial number of the current date"));
    r.add(date("NOW").args(0, 0).volatile().scalar(fn_now).help("en", "Serial number of the current date and time"));
    r.add(date("EDATE").args(2, 2).scalar(fn_edate).help("en", "Date a number of months before or after another"));
    r.add(date("EOMONTH").args(2, 2).scalar(fn_eomonth).help("en", "Last day of the month a number of months away"));
    r.add(date("DAYS").args(2, 2).scalar(fn_days).help("en", "Number of days between two dates"));
}

fn epoch_1900() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 31)
}

fn epoch_1904() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1904, 1, 1)
}

/// Serial number of a calendar date
pub(crate) fn date_to_serial(date: NaiveDate, date_1904: bool) -> Result<i64, CellError> {
    if date_1904 {
        let epoch = epoch_1904().ok_or(CellError::Num)?;
        return Ok((date - epoch).num_days());
    }
    let epoch = epoch_1900().ok_or(CellError::Num)?;
    let days = (date - epoch).num_days();
    // Dates on or after 1900-03-01 step over the phantom 1900-02-29
    Ok(if days >= 60 { days + 1 } else { days })
}

/// Calendar (year, month, day) of a serial number; the day is 0 for serial 0 in the
/// 1900 system and 29 for the phantom leap day
pub(crate) fn serial_to_ymd(serial: f64, date_1904: bool) -> Result<(i32, u32, u32), CellError> {
    let days = serial.floor();
    let max = if date_1904 {
        MAX_SERIAL_1900 - EPOCH_1904_OFFSET
    } else {
        MAX_SERIAL_1900
    };
    if !(0.0..=max as f64).contains(&days) {
        return Err(CellError::Num);
    }
    let days = days as i64;
    let date = if date_1904 {
        epoch_1904().and_then(|e| e.checked_add_signed(Duration::days(days)))
    } else {
        match days {
            0 => return Ok((1900, 1, 0)),
            60 => return Ok((1900, 2, 29)),
            d if d > 60 => epoch_1900().and_then(|e| e.checked_add_signed(Duration::days(d - 1))),
            d => epoch_1900().and_then(|e| e.checked_add_signed(Duration::days(d))),
        }
    };
    let date = date.ok_or(CellError::Num)?;
    Ok((date.year(), date.month(), date.day()))
}

/// A real calendar date for month arithmetic; the phantom leap day reads as 1900-02-28
fn serial_to_date(serial: f64, date_1904: bool) -> Result<NaiveDate, CellError> {
    let (y, m, d) = serial_to_ymd(serial, date_1904)?;
    NaiveDate::from_ymd_opt(y, m, d.max(1))
        .or_else(|| NaiveDate::from_ymd_opt(y, m, 28))
        .ok_or(CellError::Num)
}

fn serial_result(serial: i64, date_1904: bool) -> CalcResult {
    let max = if date_1904 {
        MAX_SERIAL_1900 - EPOCH_1904_OFFSET
    } else {
        MAX_SERIAL_1900
    };
    if !(0..=max).contains(&serial) {
        return Err(CellError::Num);
    }
    Ok(FormulaValue::Number(serial as f64))
}

fn shift_months(date: NaiveDate, months: f64) -> Result<NaiveDate, CellError> {
    let months = months.trunc();
    if months.abs() > 120_000.0 {
        return Err(CellError::Num);
    }
    let shifted = if months >= 0.0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new((-months) as u32))
    };
    shifted.ok_or(CellError::Num)
}

/// DATE(year, month, day)
///
/// Years 0 to 1899 are offset by 1900 in the 1900 system. Months and days outside their
/// usual ranges roll over into neighbouring months and years.
pub fn fn_date(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let date_1904 = ctx.date_1904();
    let mut year = number(args, 0)?.trunc();
    let month = number(args, 1)?.trunc();
    let day = number(args, 2)?.trunc();

    if (0.0..1900.0).contains(&year) && !date_1904 {
        year += 1900.0;
    }
    if !(0.0..10_000.0).contains(&year) || month.abs() > 120_000.0 || day.abs() > 4.0e6 {
        return Err(CellError::Num);
    }

    let months_from_zero = year as i64 * 12 + month as i64 - 1;
    let (y, m) = (months_from_zero.div_euclid(12), months_from_zero.rem_euclid(12) + 1);
    let first = i32::try_from(y)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, m as u32, 1))
        .ok_or(CellError::Num)?;
    // Offsetting from the month's first serial keeps DATE(1900, 2, 29) on serial 60
    let serial = date_to_serial(first, date_1904)? + day as i64 - 1;
    serial_result(serial, date_1904)
}

/// YEAR(serial_number)
pub fn fn_year(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let (y, _, _) = serial_to_ymd(number(args, 0)?, ctx.date_1904())?;
    Ok(FormulaValue::Number(f64::from(y)))
}

/// MONTH(serial_number)
pub fn fn_month(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let (_, m, _) = serial_to_ymd(number(args, 0)?, ctx.date_1904())?;
    Ok(FormulaValue::Number(f64::from(m)))
}

/// DAY(serial_number)
pub fn fn_day(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let (_, _, d) = serial_to_ymd(number(args, 0)?, ctx.date_1904())?;
    Ok(FormulaValue::Number(f64::from(d)))
}

/// WEEKDAY(serial_number, [return_type])
///
/// Return types: 1 (Sunday = 1), 2 (Monday = 1), 3 (Monday = 0) and 11 to 17 (week
/// starting Monday to Sunday, first day = 1).
pub fn fn_weekday(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let serial = number(args, 0)?;
    let date_1904 = ctx.date_1904();
    // Validates the range
    serial_to_ymd(serial, date_1904)?;
    let mut days = serial.floor() as i64;
    if date_1904 {
        days += EPOCH_1904_OFFSET;
    }
    // 0 = Sunday; serial 1 counts as a Sunday, as the 1900 system has always had it
    let sunday_zero = (days + 6).rem_euclid(7);
    let monday_zero = (sunday_zero + 6) % 7;

    let return_type = number_or(args, 1, 1.0)?.trunc() as i64;
    let value = match return_type {
        1 => sunday_zero + 1,
        2 => monday_zero + 1,
        3 => monday_zero,
        11..=17 => {
            let start = (return_type - 10) % 7;
            (sunday_zero - start).rem_euclid(7) + 1
        }
        _ => return Err(CellError::Num),
    };
    Ok(FormulaValue::Number(value as f64))
}

/// TODAY()
pub fn fn_today(_args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let date_1904 = ctx.date_1904();
    serial_result(date_to_serial(ctx.now().date(), date_1904)?, date_1904)
}

/// NOW()
pub fn fn_now(_args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let now = ctx.now();
    let date_1904 = ctx.date_1904();
    let day = date_to_serial(now.date(), date_1904)?;
    let fraction = f64::from(now.num_seconds_from_midnight()) / 86_400.0;
    Ok(FormulaValue::Number(day as f64 + fraction))
}

/// EDATE(start_date, months)
pub fn fn_edate(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let date_1904 = ctx.date_1904();
    let start = serial_to_date(number(args, 0)?, date_1904)?;
    let shifted = shift_months(start, number(args, 1)?)?;
    serial_result(date_to_serial(shifted, date_1904)?, date_1904)
}

/// EOMONTH(start_date, months)
pub fn fn_eomonth(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let date_1904 = ctx.date_1904();
    let start = serial_to_date(number(args, 0)?, date_1904)?;
    let first = start.with_day(1).ok_or(CellError::Num)?;
    let next_month = shift_months(first, number(args, 1)? + 1.0)?;
    let last = next_month.pred_opt().ok_or(CellError::Num)?;
    serial_result(date_to_serial(last, date_1904)?, date_1904)
}

/// DAYS(end_date, start_date)
pub fn fn_days(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    if is_omitted(args, 0) && is_omitted(args, 1) {
        return Ok(FormulaValue::Number(0.0));
    }
    let end = number(args, 0)?.floor();
    let start = number(args, 1)?.floor();
    Ok(FormulaValue::Number(end - start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{eval, eval_on, num};
    use pretty_assertions::assert_eq;
    use sheetcalc_core::{Snapshot, Workbook};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_serials_1900() {
        assert_eq!(date_to_serial(ymd(1900, 1, 1), false), Ok(1));
        assert_eq!(date_to_serial(ymd(1900, 2, 28), false), Ok(59));
        assert_eq!(date_to_serial(ymd(1900, 3, 1), false), Ok(61));
        assert_eq!(date_to_serial(ymd(2020, 1, 1), false), Ok(43831));
        assert_eq!(serial_to_ymd(60.0, false), Ok((1900, 2, 29)));
        assert_eq!(serial_to_ymd(61.0, false), Ok((1900, 3, 1)));
        assert_eq!(serial_to_ymd(0.0, false), Ok((1900, 1, 0)));
        assert_eq!(serial_to_ymd(43831.75, false), Ok((2020, 1, 1)));
        assert_eq!(serial_to_ymd(-1.0, false), Err(CellError::Num));
    }

    #[test]
    fn test_serials_1904() {
        assert_eq!(date_to_serial(ymd(1904, 1, 1), true), Ok(0));
        assert_eq!(date_to_serial(ymd(2020, 1, 1), true), Ok(43831 - 1462));
        assert_eq!(serial_to_ymd(1.0, true), Ok((1904, 1, 2)));
    }

    #[test]
    fn test_date_function() {
        assert_eq!(eval("=DATE(2020, 1, 1)"), num(43831.0));
        assert_eq!(eval("=DATE(1900, 2, 29)"), num(60.0));
        assert_eq!(eval("=DATE(2019, 13, 1)"), num(43831.0));
        assert_eq!(eval("=DATE(2020, 1, 0)"), num(43830.0));
        assert_eq!(eval("=DATE(120, 1, 1)"), num(43831.0));
        assert_eq!(eval("=DATE(-1, 1, 1)"), FormulaValue::Error(CellError::Num));
        assert_eq!(eval("=YEAR(DATE(2024, 2, 29))"), num(2024.0));
        assert_eq!(eval("=MONTH(60)"), num(2.0));
        assert_eq!(eval("=DAY(60)"), num(29.0));
    }

    #[test]
    fn test_date_1904_system() {
        let mut book = Workbook::new("book1");
        book.settings_mut().date_1904 = true;
        let mut snapshot = Snapshot::new();
        snapshot.add_unit(book).unwrap();
        assert_eq!(eval_on(&snapshot, "=DATE(1904, 1, 1)"), num(0.0));
        assert_eq!(eval_on(&snapshot, "=TODAY()"), num(43831.0 - 1462.0));
        assert_eq!(eval_on(&snapshot, "=YEAR(0)"), num(1904.0));
    }

    #[test]
    fn test_weekday() {
        // 2020-01-01 was a Wednesday
        assert_eq!(eval("=WEEKDAY(43831)"), num(4.0));
        assert_eq!(eval("=WEEKDAY(43831, 2)"), num(3.0));
        assert_eq!(eval("=WEEKDAY(43831, 3)"), num(2.0));
        assert_eq!(eval("=WEEKDAY(43831, 13)"), num(1.0));
        assert_eq!(eval("=WEEKDAY(1)"), num(1.0));
        assert_eq!(eval("=WEEKDAY(43831, 9)"), FormulaValue::Error(CellError::Num));
    }

    #[test]
    fn test_month_arithmetic() {
        assert_eq!(eval("=EDATE(DATE(2020, 1, 31), 1)"), eval("=DATE(2020, 2, 29)"));
        assert_eq!(eval("=EDATE(DATE(2020, 3, 15), -14)"), eval("=DATE(2019, 1, 15)"));
        assert_eq!(eval("=EOMONTH(DATE(2020, 1, 15), 1)"), eval("=DATE(2020, 2, 29)"));
        assert_eq!(eval("=EOMONTH(DATE(2020, 1, 15), -1)"), eval("=DATE(2019, 12, 31)"));
        assert_eq!(eval("=DAYS(DATE(2020, 3, 1), DATE(2020, 2, 1))"), num(29.0));
    }

    #[test]
    fn test_clock_functions() {
        assert_eq!(eval("=TODAY()"), num(43831.0));
        assert_eq!(eval("=NOW()"), num(43831.0));
    }
}
