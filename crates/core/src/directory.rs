use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::error::{require_text, ValidationError};
use crate::types::Employee;

/// Whole years elapsed between `from` and `on`.
pub fn whole_years(from: NaiveDate, on: NaiveDate) -> i32 {
    let mut years = on.year() - from.year();
    if (on.month(), on.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years
}

impl Employee {
    pub fn age_on(&self, today: NaiveDate) -> i32 {
        whole_years(self.birth_date, today)
    }

    pub fn years_of_service(&self, today: NaiveDate) -> i32 {
        whole_years(self.hire_date, today)
    }
}

/// Anniversary of `birth` in `year`; February 29 falls back to February 28.
pub fn birthday_in_year(birth: NaiveDate, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, birth.month(), birth.day() - 1))
}

/// Next birthday on or after `today`.
pub fn next_birthday(birth: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = birthday_in_year(birth, today.year())?;
    if this_year >= today {
        Some(this_year)
    } else {
        birthday_in_year(birth, today.year() + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BirthdayEntry {
    pub employee_id: String,
    pub full_name: String,
    pub birthday: NaiveDate,
    pub age: i32,
}

/// Active employees whose next birthday falls within `days` of `today`, soonest first.
pub fn upcoming_birthdays(employees: &[Employee], today: NaiveDate, days: i64) -> Vec<BirthdayEntry> {
    let horizon = today + Duration::days(days);
    let mut entries: Vec<BirthdayEntry> = employees
        .iter()
        .filter(|employee| employee.is_active)
        .filter_map(|employee| {
            let birthday = next_birthday(employee.birth_date, today)?;
            (birthday <= horizon).then(|| BirthdayEntry {
                employee_id: employee.id.clone(),
                full_name: employee.full_name(),
                birthday,
                age: birthday.year() - employee.birth_date.year(),
            })
        })
        .collect();
    entries.sort_by(|a, b| a.birthday.cmp(&b.birthday).then_with(|| a.full_name.cmp(&b.full_name)));
    entries
}

/// Birthdays of active employees in `month` of `year`, ordered by day.
pub fn birthdays_in_month(employees: &[Employee], month: u32, year: i32) -> Vec<BirthdayEntry> {
    let mut entries: Vec<BirthdayEntry> = employees
        .iter()
        .filter(|employee| employee.is_active && employee.birth_date.month() == month)
        .filter_map(|employee| {
            let birthday = birthday_in_year(employee.birth_date, year)?;
            Some(BirthdayEntry {
                employee_id: employee.id.clone(),
                full_name: employee.full_name(),
                birthday,
                age: year - employee.birth_date.year(),
            })
        })
        .collect();
    entries.sort_by(|a, b| a.birthday.cmp(&b.birthday).then_with(|| a.full_name.cmp(&b.full_name)));
    entries
}

/// Required identity fields of an employee record.
pub fn validate_identity(
    employee_code: &str,
    username: &str,
    first_name: &str,
    last_name: &str,
    email: &str,
) -> Result<(), ValidationError> {
    require_text("employee_code", employee_code)?;
    require_text("username", username)?;
    require_text("first_name", first_name)?;
    require_text("last_name", last_name)?;
    require_text("email", email)?;
    if !email.contains('@') {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn employee(id: &str, first: &str, birth: NaiveDate, active: bool) -> Employee {
        Employee {
            id: id.to_string(),
            employee_code: format!("EMP-{id}"),
            username: id.to_string(),
            first_name: first.to_string(),
            last_name: "Doe".to_string(),
            email: format!("{id}@example.com"),
            phone: String::new(),
            mobile: String::new(),
            birth_date: birth,
            hire_date: day(2020, 1, 15),
            position: "Engineer".to_string(),
            department: "Technology".to_string(),
            emergency_contact: String::new(),
            emergency_phone: String::new(),
            notes: String::new(),
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn age_counts_completed_years() {
        let person = employee("a", "Ana", day(1990, 10, 19), true);
        assert_eq!(person.age_on(day(2026, 10, 18)), 35);
        assert_eq!(person.age_on(day(2026, 10, 19)), 36);
        assert_eq!(person.years_of_service(day(2026, 1, 14)), 5);
        assert_eq!(person.years_of_service(day(2026, 1, 15)), 6);
    }

    #[test]
    fn leap_day_birthday_falls_back_in_common_years() {
        assert_eq!(birthday_in_year(day(2000, 2, 29), 2026), Some(day(2026, 2, 28)));
        assert_eq!(birthday_in_year(day(2000, 2, 29), 2028), Some(day(2028, 2, 29)));
    }

    #[test]
    fn next_birthday_rolls_over_to_next_year() {
        assert_eq!(next_birthday(day(1990, 3, 15), day(2026, 10, 18)), Some(day(2027, 3, 15)));
        assert_eq!(next_birthday(day(1990, 10, 18), day(2026, 10, 18)), Some(day(2026, 10, 18)));
    }

    #[test]
    fn upcoming_birthdays_are_sorted_and_bounded() {
        let today = day(2026, 10, 18);
        let staff = vec![
            employee("a", "Ana", day(1990, 11, 10), true),
            employee("b", "Bruno", day(1985, 10, 20), true),
            employee("c", "Carla", day(1992, 12, 25), true),
            employee("d", "Dario", day(1991, 10, 25), false),
        ];
        let upcoming = upcoming_birthdays(&staff, today, 30);
        let names: Vec<_> = upcoming.iter().map(|entry| entry.full_name.as_str()).collect();
        assert_eq!(names, vec!["Bruno Doe", "Ana Doe"]);
        assert_eq!(upcoming[0].age, 41);
    }

    #[test]
    fn month_calendar_lists_active_employees_by_day() {
        let staff = vec![
            employee("a", "Ana", day(1990, 7, 22), true),
            employee("b", "Bruno", day(1988, 7, 3), true),
            employee("c", "Carla", day(1992, 8, 1), true),
        ];
        let july = birthdays_in_month(&staff, 7, 2026);
        assert_eq!(july.len(), 2);
        assert_eq!(july[0].birthday, day(2026, 7, 3));
        assert_eq!(july[0].age, 38);
    }

    #[test]
    fn identity_requires_all_fields() {
        assert!(validate_identity("EMP1", "jdoe", "John", "Doe", "j@x.io").is_ok());
        assert_eq!(
            validate_identity("", "jdoe", "John", "Doe", "j@x.io"),
            Err(ValidationError::Blank("employee_code"))
        );
        assert!(validate_identity("EMP1", "jdoe", "John", "Doe", "nobody").is_err());
    }
}
