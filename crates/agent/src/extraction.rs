use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

use autoxloo_core::domain::vehicle::{StockNumber, VehicleCategory};

/// Everything the deterministic parsers could read out of one customer
/// message. Fields are `None`/empty when the message says nothing about them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSignals {
    pub price_ceiling: Option<u32>,
    pub price_floor: Option<u32>,
    pub category: Option<VehicleCategory>,
    pub make: Option<String>,
    pub features: Vec<String>,
    pub stock_number: Option<StockNumber>,
    pub email: Option<String>,
    pub customer_name: Option<String>,
    pub timeline: Option<String>,
    pub trade_in: Option<bool>,
    /// Leading yes/no, for answers to a closed question.
    pub affirmation: Option<bool>,
    pub day: Option<DayReference>,
    pub time: Option<TimeReference>,
    /// 1-based pick among previously proposed options.
    pub option_choice: Option<usize>,
}

impl MessageSignals {
    pub fn has_search_criteria(&self) -> bool {
        self.category.is_some()
            || self.make.is_some()
            || self.price_ceiling.is_some()
            || self.price_floor.is_some()
            || !self.features.is_empty()
    }

    pub fn has_qualification_answer(&self) -> bool {
        self.price_ceiling.is_some()
            || self.timeline.is_some()
            || self.trade_in.is_some()
            || self.affirmation.is_some()
            || self.email.is_some()
            || self.customer_name.is_some()
    }

    pub fn has_scheduling_detail(&self) -> bool {
        self.day.is_some() || self.time.is_some() || self.option_choice.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DayReference {
    Today,
    Tomorrow,
    /// "Saturday", "this Saturday": the next occurrence, today included.
    ThisWeekday(Weekday),
    /// "next Saturday": one week after the `ThisWeekday` date.
    NextWeekday(Weekday),
}

impl DayReference {
    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Today => today,
            Self::Tomorrow => today + Duration::days(1),
            Self::ThisWeekday(weekday) => today + Duration::days(days_until(today, *weekday)),
            Self::NextWeekday(weekday) => {
                today + Duration::days(days_until(today, *weekday) + 7)
            }
        }
    }
}

fn days_until(today: NaiveDate, weekday: Weekday) -> i64 {
    let current = i64::from(today.weekday().num_days_from_monday());
    let target = i64::from(weekday.num_days_from_monday());
    (target - current).rem_euclid(7)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl PartOfDay {
    /// Half-open hour range `[start, end)`.
    pub fn hours(&self) -> (u32, u32) {
        match self {
            Self::Morning => (8, 12),
            Self::Afternoon => (12, 17),
            Self::Evening => (17, 21),
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let (start, end) = self.hours();
        let hour = chrono::Timelike::hour(&time);
        hour >= start && hour < end
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeReference {
    At(NaiveTime),
    Part(PartOfDay),
}

const KNOWN_MAKES: &[(&str, &str)] = &[
    ("acura", "Acura"),
    ("audi", "Audi"),
    ("bmw", "BMW"),
    ("buick", "Buick"),
    ("cadillac", "Cadillac"),
    ("chevrolet", "Chevrolet"),
    ("chevy", "Chevrolet"),
    ("chrysler", "Chrysler"),
    ("dodge", "Dodge"),
    ("ford", "Ford"),
    ("gmc", "GMC"),
    ("honda", "Honda"),
    ("hyundai", "Hyundai"),
    ("jeep", "Jeep"),
    ("kia", "Kia"),
    ("lexus", "Lexus"),
    ("mazda", "Mazda"),
    ("mercedes", "Mercedes-Benz"),
    ("nissan", "Nissan"),
    ("ram", "Ram"),
    ("subaru", "Subaru"),
    ("tesla", "Tesla"),
    ("toyota", "Toyota"),
    ("volkswagen", "Volkswagen"),
    ("vw", "Volkswagen"),
    ("volvo", "Volvo"),
];

/// Phrase cues mapped to the keyword matched against inventory feature names.
const FEATURE_CUES: &[(&[&str], &str)] = &[
    (&["navigation", "nav ", "gps"], "navigation"),
    (&["backup camera", "rear camera", "360"], "camera"),
    (&["blind spot", "safety", "safe "], "blind spot"),
    (&["leather"], "leather"),
    (&["sunroof", "moonroof"], "sunroof"),
    (&["heated seat", "heated"], "heated seats"),
    (&["carplay", "android auto"], "carplay"),
    (&["adaptive cruise", "cruise control"], "adaptive cruise"),
    (&["lane keep", "lane assist"], "lane keeping"),
    (&["wireless charging"], "wireless charging"),
    (&["premium audio", "sound system"], "audio"),
];

const TIMELINE_CUES: &[(&str, &str)] = &[
    ("asap", "as soon as possible"),
    ("as soon as possible", "as soon as possible"),
    ("right away", "as soon as possible"),
    ("immediately", "as soon as possible"),
    ("this month", "this month"),
    ("next month", "next month"),
    ("within a month", "within a month"),
    ("in a month", "within a month"),
    ("couple of months", "in a few months"),
    ("couple months", "in a few months"),
    ("few months", "in a few months"),
    ("3 months", "within 3 months"),
    ("three months", "within 3 months"),
    ("6 months", "within 6 months"),
    ("six months", "within 6 months"),
    ("this year", "this year"),
    ("next year", "next year"),
    ("just browsing", "just browsing"),
    ("just looking", "just browsing"),
    ("no rush", "no rush"),
];

const TRADE_IN_NEGATIONS: &[&str] = &[
    "no trade",
    "not trading",
    "won't be trading",
    "without a trade",
    "don't have a trade",
    "dont have a trade",
    "nothing to trade",
];

const TRADE_IN_CUES: &[&str] = &["trade-in", "trade in", "trading in", "trade my", "my trade"];

const FLOOR_WORDS: &[&str] = &["over", "above", "min", "minimum", "from", "between"];
const CEILING_WORDS: &[&str] = &[
    "under", "below", "max", "maximum", "budget", "ceiling", "around", "about", "within",
    "than", "to", "cap", "spend", "upto", "approximately", "roughly",
];
const DISTANCE_UNITS: &[&str] = &["miles", "mile", "mi", "km"];

#[derive(Clone, Debug, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> MessageSignals {
        let normalized_text = normalize_text(text);
        let original_tokens = tokenize(text);
        let tokens: Vec<String> =
            original_tokens.iter().map(|token| token.to_ascii_lowercase()).collect();

        let (price_floor, price_ceiling) = extract_price_range(&tokens);
        let (day, part_from_day) = extract_day(&tokens);

        MessageSignals {
            price_ceiling,
            price_floor,
            category: tokens.iter().find_map(|token| VehicleCategory::parse(token)),
            make: extract_make(&tokens),
            features: extract_features(&normalized_text),
            stock_number: tokens.iter().find_map(|token| parse_stock_number(token)),
            email: tokens.iter().find_map(|token| parse_email(token)),
            customer_name: extract_customer_name(&original_tokens, &tokens),
            timeline: extract_timeline(&normalized_text),
            trade_in: extract_trade_in(&normalized_text),
            affirmation: extract_affirmation(&tokens),
            day,
            time: extract_clock_time(&tokens)
                .map(TimeReference::At)
                .or_else(|| extract_part_of_day(&tokens).map(TimeReference::Part))
                .or(part_from_day.map(TimeReference::Part)),
            option_choice: extract_option_choice(&tokens),
        }
    }
}

fn normalize_text(text: &str) -> String {
    format!("{} ", text.to_ascii_lowercase())
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric()
            || matches!(character, '$' | '.' | ',' | ':' | '#' | '@' | '-' | '_' | '+' | '\'')
        {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, '.' | ',' | ':' | '\'' | '-')))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// `$35k`, `35,000`, `$1` -> whole dollars, plus whether the token was
/// unmistakably money (`$` prefix or `k` suffix).
fn parse_money_token(token: &str) -> Option<(u32, bool)> {
    let explicit = token.starts_with('$');
    let raw = token.trim_start_matches('$').replace(',', "");
    let (number_part, multiplier, suffixed) = match raw.strip_suffix('k') {
        Some(prefix) => (prefix.to_string(), 1_000.0, true),
        None => (raw, 1.0, false),
    };
    if number_part.is_empty()
        || !number_part.chars().all(|character| character.is_ascii_digit() || character == '.')
    {
        return None;
    }

    let amount = number_part.parse::<f64>().ok()?;
    let dollars = (amount * multiplier).round();
    if !(0.0..=f64::from(u32::MAX)).contains(&dollars) {
        return None;
    }
    Some((dollars as u32, explicit || suffixed))
}

fn extract_price_range(tokens: &[String]) -> (Option<u32>, Option<u32>) {
    let mut floor = None;
    let mut ceiling = None;
    let mut open_between = false;

    for (index, token) in tokens.iter().enumerate() {
        let Some((amount, explicit)) = parse_money_token(token) else {
            continue;
        };
        if tokens.get(index + 1).is_some_and(|next| DISTANCE_UNITS.contains(&next.as_str())) {
            continue;
        }

        let previous = index.checked_sub(1).map(|at| tokens[at].as_str()).unwrap_or("");
        let before_previous = index.checked_sub(2).map(|at| tokens[at].as_str()).unwrap_or("");

        let floor_context = FLOOR_WORDS.contains(&previous)
            || matches!((before_previous, previous), ("at", "least") | ("more", "than"))
            || matches!((before_previous, previous), ("starting", "at"));
        let closes_between = open_between && previous == "and";
        let ceiling_context = closes_between
            || CEILING_WORDS.contains(&previous)
            || CEILING_WORDS.contains(&before_previous);

        if !explicit && !floor_context && !ceiling_context {
            continue;
        }
        if !explicit && amount < 1_000 {
            continue;
        }

        if floor_context && !closes_between {
            open_between = previous == "between";
            floor = floor.or(Some(amount));
        } else {
            open_between = false;
            ceiling = ceiling.or(Some(amount));
        }
    }

    (floor, ceiling)
}

fn extract_make(tokens: &[String]) -> Option<String> {
    tokens.iter().find_map(|token| {
        KNOWN_MAKES
            .iter()
            .find(|(alias, _)| alias == token)
            .map(|(_, display)| (*display).to_string())
    })
}

fn extract_features(normalized_text: &str) -> Vec<String> {
    let mut features = BTreeSet::new();
    for (cues, keyword) in FEATURE_CUES {
        if cues.iter().any(|cue| normalized_text.contains(cue)) {
            features.insert((*keyword).to_string());
        }
    }
    features.into_iter().collect()
}

/// `AX10000`, `#ax10000`: one to three letters followed by four or more digits.
fn parse_stock_number(token: &str) -> Option<StockNumber> {
    let candidate = token.trim_start_matches('#');
    let letters = candidate.chars().take_while(|character| character.is_ascii_alphabetic()).count();
    let digits = &candidate[letters..];
    if (1..=3).contains(&letters)
        && digits.len() >= 4
        && digits.chars().all(|character| character.is_ascii_digit())
    {
        Some(StockNumber::normalized(candidate))
    } else {
        None
    }
}

fn parse_email(token: &str) -> Option<String> {
    let (local, domain) = token.split_once('@')?;
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return None;
    }
    Some(token.to_ascii_lowercase())
}

fn extract_customer_name(original_tokens: &[String], tokens: &[String]) -> Option<String> {
    const STOP_WORDS: &[&str] = &["and", "i", "my", "email", "phone", "i'm", "im", "here"];

    let start = tokens.windows(3).position(|window| {
        matches!((window[0].as_str(), window[1].as_str(), window[2].as_str()), ("my", "name", "is"))
    })?;

    let name_parts: Vec<String> = original_tokens
        .iter()
        .zip(tokens.iter())
        .skip(start + 3)
        .take_while(|(original, lower)| {
            original.chars().all(|character| character.is_ascii_alphabetic())
                && !STOP_WORDS.contains(&lower.as_str())
        })
        .take(2)
        .map(|(original, _)| capitalize(original))
        .collect();

    if name_parts.is_empty() {
        None
    } else {
        Some(name_parts.join(" "))
    }
}

fn capitalize(word: &str) -> String {
    let mut characters = word.chars();
    match characters.next() {
        Some(first) => {
            first.to_ascii_uppercase().to_string() + &characters.as_str().to_ascii_lowercase()
        }
        None => String::new(),
    }
}

fn extract_timeline(normalized_text: &str) -> Option<String> {
    TIMELINE_CUES
        .iter()
        .find(|(pattern, _)| normalized_text.contains(pattern))
        .map(|(_, label)| (*label).to_string())
}

fn extract_trade_in(normalized_text: &str) -> Option<bool> {
    if TRADE_IN_NEGATIONS.iter().any(|pattern| normalized_text.contains(pattern)) {
        return Some(false);
    }
    if TRADE_IN_CUES.iter().any(|pattern| normalized_text.contains(pattern)) {
        return Some(true);
    }
    None
}

fn extract_affirmation(tokens: &[String]) -> Option<bool> {
    match tokens.first().map(String::as_str) {
        Some("yes" | "yeah" | "yep" | "yup" | "sure" | "definitely" | "correct") => Some(true),
        Some("no" | "nope" | "nah") => Some(false),
        _ => None,
    }
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token.trim_end_matches('s') {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn extract_day(tokens: &[String]) -> (Option<DayReference>, Option<PartOfDay>) {
    for (index, token) in tokens.iter().enumerate() {
        let after_next = index > 0 && tokens[index - 1] == "next";
        match token.as_str() {
            "today" => return (Some(DayReference::Today), None),
            "tonight" => return (Some(DayReference::Today), Some(PartOfDay::Evening)),
            "tomorrow" => return (Some(DayReference::Tomorrow), None),
            "weekend" => {
                let day = if after_next {
                    DayReference::NextWeekday(Weekday::Sat)
                } else {
                    DayReference::ThisWeekday(Weekday::Sat)
                };
                return (Some(day), None);
            }
            _ => {}
        }
        if let Some(weekday) = parse_weekday(token) {
            let day = if after_next {
                DayReference::NextWeekday(weekday)
            } else {
                DayReference::ThisWeekday(weekday)
            };
            return (Some(day), None);
        }
    }
    (None, None)
}

fn extract_part_of_day(tokens: &[String]) -> Option<PartOfDay> {
    tokens.iter().find_map(|token| match token.as_str() {
        "morning" => Some(PartOfDay::Morning),
        "afternoon" => Some(PartOfDay::Afternoon),
        "evening" => Some(PartOfDay::Evening),
        _ => None,
    })
}

fn extract_clock_time(tokens: &[String]) -> Option<NaiveTime> {
    tokens.iter().enumerate().find_map(|(index, token)| {
        let previous = index.checked_sub(1).map(|at| tokens[at].as_str());
        let next = tokens.get(index + 1).map(String::as_str);
        parse_clock_token(token, previous, next)
    })
}

fn parse_clock_token(token: &str, previous: Option<&str>, next: Option<&str>) -> Option<NaiveTime> {
    if token == "noon" {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }

    let (body, meridiem) = if let Some(body) = token.strip_suffix("am") {
        (body, Some(false))
    } else if let Some(body) = token.strip_suffix("pm") {
        (body, Some(true))
    } else {
        match next {
            Some("am" | "a.m") => (token, Some(false)),
            Some("pm" | "p.m") => (token, Some(true)),
            _ => (token, None),
        }
    };

    let (hour_part, minute_part) = match body.split_once(':') {
        Some((hour, minute)) => (hour, Some(minute)),
        None => (body, None),
    };
    if hour_part.is_empty() || !hour_part.chars().all(|character| character.is_ascii_digit()) {
        return None;
    }
    let mut hour: u32 = hour_part.parse().ok()?;
    let minute: u32 = match minute_part {
        Some(minute) if minute.len() == 2 => minute.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };
    if minute > 59 {
        return None;
    }

    match meridiem {
        Some(is_pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if is_pm && hour < 12 {
                hour += 12;
            } else if !is_pm && hour == 12 {
                hour = 0;
            }
        }
        None if minute_part.is_some() => {
            if hour > 23 {
                return None;
            }
        }
        None => {
            // Bare "at 3" reads as a business hour.
            if previous != Some("at") || !(1..=12).contains(&hour) {
                return None;
            }
            if hour < 8 {
                hour += 12;
            }
        }
    }

    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn extract_option_choice(tokens: &[String]) -> Option<usize> {
    if let [only] = tokens {
        if let Ok(choice) = only.trim_start_matches('#').parse::<usize>() {
            return (1..=9).contains(&choice).then_some(choice);
        }
    }

    for (index, token) in tokens.iter().enumerate() {
        if matches!(token.as_str(), "option" | "number" | "slot" | "choice") {
            if let Some(choice) =
                tokens.get(index + 1).and_then(|next| next.trim_start_matches('#').parse().ok())
            {
                if (1..=9).contains(&choice) {
                    return Some(choice);
                }
            }
        }
        if let Some(rest) = token.strip_prefix('#') {
            if let Ok(choice) = rest.parse::<usize>() {
                if (1..=9).contains(&choice) {
                    return Some(choice);
                }
            }
        }
        let ordinal = match token.as_str() {
            "first" | "1st" => Some(1),
            "second" | "2nd" => Some(2),
            "third" | "3rd" => Some(3),
            _ => None,
        };
        if ordinal.is_some() {
            return ordinal;
        }
    }
    None
}
