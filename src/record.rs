//! Native genealogy records as kept by the host database.
//!
//! Records refer to each other by [`Handle`] only. Everything a script sees is
//! reached through a [`crate::proxy::Proxy`] wrapped around one of these.

use std::cmp::Ordering;
use std::fmt;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

// ------------- Handle -------------
pub type Handle = u64;

// ------------- Category -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Person,
    Family,
    Event,
    Place,
    Citation,
    Source,
    Repository,
    Note,
    Media,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Person,
        Category::Family,
        Category::Event,
        Category::Place,
        Category::Citation,
        Category::Source,
        Category::Repository,
        Category::Note,
        Category::Media,
    ];

    /// The user facing name, as shown in category selectors and stored in query files.
    pub fn name(&self) -> &'static str {
        match self {
            Category::Person => "People",
            Category::Family => "Families",
            Category::Event => "Events",
            Category::Place => "Places",
            Category::Citation => "Citations",
            Category::Source => "Sources",
            Category::Repository => "Repositories",
            Category::Note => "Notes",
            Category::Media => "Media",
        }
    }

    /// The namespace custom filters are registered under.
    pub fn namespace(&self) -> &'static str {
        match self {
            Category::Person => "Person",
            Category::Family => "Family",
            Category::Event => "Event",
            Category::Place => "Place",
            Category::Citation => "Citation",
            Category::Source => "Source",
            Category::Repository => "Repository",
            Category::Note => "Note",
            Category::Media => "Media",
        }
    }

    /// Accepts both the plural category name and the namespace, ignoring case.
    pub fn from_name(name: &str) -> Option<Category> {
        let name = name.trim();
        Category::ALL.into_iter().find(|c| {
            c.name().eq_ignore_ascii_case(name) || c.namespace().eq_ignore_ascii_case(name)
        })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

// ------------- Date -------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DateModifier {
    #[default]
    None,
    About,
    Before,
    After,
}

/// A genealogical date. Zero in `month` or `day` means the part is unknown,
/// a date with all parts zero is the empty date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Date {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub modifier: DateModifier,
}

impl Date {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self {
            year,
            month,
            day,
            modifier: DateModifier::None,
        }
    }
    pub fn with_modifier(mut self, modifier: DateModifier) -> Self {
        self.modifier = modifier;
        self
    }
    pub fn today() -> Self {
        let now = chrono::Local::now().date_naive();
        Self::new(now.year(), now.month(), now.day())
    }
    pub fn is_empty(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }
    pub fn add_years(&self, years: i64) -> Self {
        let mut date = *self;
        date.year = (self.year as i64)
            .saturating_add(years)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        date
    }
    /// Whole years from `earlier` to `self`. Unknown months or days do not
    /// shorten the span.
    pub fn years_since(&self, earlier: &Date) -> i64 {
        let mut years = self.year as i64 - earlier.year as i64;
        let known = self.month != 0 && earlier.month != 0;
        if known {
            let day_known = self.day != 0 && earlier.day != 0;
            let this = (self.month, if day_known { self.day } else { 0 });
            let that = (earlier.month, if day_known { earlier.day } else { 0 });
            if this < that {
                years -= 1;
            }
        }
        years
    }
    fn sort_key(&self) -> (i32, u32, u32) {
        (self.year, self.month, self.day)
    }
}

impl Ord for Date {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then(self.modifier.cmp(&other.modifier))
    }
}
impl PartialOrd for Date {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        match self.modifier {
            DateModifier::None => {}
            DateModifier::About => f.write_str("about ")?,
            DateModifier::Before => f.write_str("before ")?,
            DateModifier::After => f.write_str("after ")?,
        }
        if self.month == 0 {
            write!(f, "{}", self.year)
        } else if self.day == 0 {
            write!(f, "{:04}-{:02}", self.year, self.month)
        } else {
            write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
        }
    }
}

// ------------- Shared parts -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Name {
    pub first_name: String,
    pub surname: String,
    pub kind: String,
}

impl Name {
    pub fn new(first_name: &str, surname: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            surname: surname.to_string(),
            kind: String::from("Birth Name"),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.surname.is_empty(), self.first_name.is_empty()) {
            (false, false) => write!(f, "{}, {}", self.surname, self.first_name),
            (false, true) => f.write_str(&self.surname),
            _ => f.write_str(&self.first_name),
        }
    }
}

fn primary_role() -> String {
    String::from("Primary")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRef {
    pub event: Handle,
    #[serde(default = "primary_role")]
    pub role: String,
}

impl EventRef {
    pub fn primary(event: Handle) -> Self {
        Self {
            event,
            role: primary_role(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    pub fn code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Unknown => "U",
        }
    }
}

// ------------- Records -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Person {
    pub gramps_id: String,
    pub gender: Gender,
    pub primary_name: Name,
    pub alternate_names: Vec<Name>,
    pub event_refs: Vec<EventRef>,
    pub birth_ref_index: Option<usize>,
    pub death_ref_index: Option<usize>,
    pub families: Vec<Handle>,
    pub parent_families: Vec<Handle>,
    pub citations: Vec<Handle>,
    pub notes: Vec<Handle>,
    pub attributes: Vec<Attribute>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Family {
    pub gramps_id: String,
    pub father: Option<Handle>,
    pub mother: Option<Handle>,
    pub children: Vec<Handle>,
    pub relationship: String,
    pub event_refs: Vec<EventRef>,
    pub citations: Vec<Handle>,
    pub notes: Vec<Handle>,
    pub attributes: Vec<Attribute>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub gramps_id: String,
    pub kind: String,
    pub date: Date,
    pub description: String,
    pub place: Option<Handle>,
    pub citations: Vec<Handle>,
    pub notes: Vec<Handle>,
    pub attributes: Vec<Attribute>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Place {
    pub gramps_id: String,
    pub name: String,
    pub title: String,
    pub kind: String,
    pub code: String,
    pub lat: String,
    pub long: String,
    pub enclosed_by: Vec<Handle>,
    pub citations: Vec<Handle>,
    pub notes: Vec<Handle>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Citation {
    pub gramps_id: String,
    pub page: String,
    pub confidence: i64,
    pub date: Date,
    pub source: Option<Handle>,
    pub notes: Vec<Handle>,
    pub attributes: Vec<Attribute>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub gramps_id: String,
    pub title: String,
    pub author: String,
    pub abbrev: String,
    pub pubinfo: String,
    pub repositories: Vec<Handle>,
    pub notes: Vec<Handle>,
    pub attributes: Vec<Attribute>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub gramps_id: String,
    pub name: String,
    pub kind: String,
    pub notes: Vec<Handle>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Note {
    pub gramps_id: String,
    pub text: String,
    pub kind: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Media {
    pub gramps_id: String,
    pub path: String,
    pub mime: String,
    pub desc: String,
    pub checksum: String,
    pub date: Date,
    pub citations: Vec<Handle>,
    pub notes: Vec<Handle>,
    pub attributes: Vec<Attribute>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category")]
pub enum Record {
    Person(Person),
    Family(Family),
    Event(Event),
    Place(Place),
    Citation(Citation),
    Source(Source),
    Repository(Repository),
    Note(Note),
    Media(Media),
}

macro_rules! each_record {
    ($record:expr, $r:ident => $body:expr) => {
        match $record {
            Record::Person($r) => $body,
            Record::Family($r) => $body,
            Record::Event($r) => $body,
            Record::Place($r) => $body,
            Record::Citation($r) => $body,
            Record::Source($r) => $body,
            Record::Repository($r) => $body,
            Record::Note($r) => $body,
            Record::Media($r) => $body,
        }
    };
}

impl Record {
    pub fn category(&self) -> Category {
        match self {
            Record::Person(_) => Category::Person,
            Record::Family(_) => Category::Family,
            Record::Event(_) => Category::Event,
            Record::Place(_) => Category::Place,
            Record::Citation(_) => Category::Citation,
            Record::Source(_) => Category::Source,
            Record::Repository(_) => Category::Repository,
            Record::Note(_) => Category::Note,
            Record::Media(_) => Category::Media,
        }
    }
    pub fn gramps_id(&self) -> &str {
        each_record!(self, r => &r.gramps_id)
    }
    pub fn tags(&self) -> &[String] {
        each_record!(self, r => &r.tags)
    }
    pub fn tags_mut(&mut self) -> &mut Vec<String> {
        each_record!(self, r => &mut r.tags)
    }
    pub fn notes(&self) -> &[Handle] {
        each_record!(self, r => record_notes(r))
    }
    pub fn citations(&self) -> &[Handle] {
        match self {
            Record::Person(r) => &r.citations,
            Record::Family(r) => &r.citations,
            Record::Event(r) => &r.citations,
            Record::Place(r) => &r.citations,
            Record::Media(r) => &r.citations,
            _ => &[],
        }
    }
    pub fn attributes(&self) -> Option<&[Attribute]> {
        match self {
            Record::Person(r) => Some(&r.attributes),
            Record::Family(r) => Some(&r.attributes),
            Record::Event(r) => Some(&r.attributes),
            Record::Citation(r) => Some(&r.attributes),
            Record::Source(r) => Some(&r.attributes),
            Record::Media(r) => Some(&r.attributes),
            _ => None,
        }
    }
    pub fn attributes_mut(&mut self) -> Option<&mut Vec<Attribute>> {
        match self {
            Record::Person(r) => Some(&mut r.attributes),
            Record::Family(r) => Some(&mut r.attributes),
            Record::Event(r) => Some(&mut r.attributes),
            Record::Citation(r) => Some(&mut r.attributes),
            Record::Source(r) => Some(&mut r.attributes),
            Record::Media(r) => Some(&mut r.attributes),
            _ => None,
        }
    }

    /// Every handle this record points at; the database indexes these as backlinks.
    pub fn references(&self) -> Vec<Handle> {
        let mut refs: Vec<Handle> = Vec::new();
        match self {
            Record::Person(p) => {
                refs.extend(p.event_refs.iter().map(|e| e.event));
                refs.extend(&p.families);
                refs.extend(&p.parent_families);
            }
            Record::Family(f) => {
                refs.extend(f.father);
                refs.extend(f.mother);
                refs.extend(&f.children);
                refs.extend(f.event_refs.iter().map(|e| e.event));
            }
            Record::Event(e) => refs.extend(e.place),
            Record::Place(p) => refs.extend(&p.enclosed_by),
            Record::Citation(c) => refs.extend(c.source),
            Record::Source(s) => refs.extend(&s.repositories),
            Record::Repository(_) | Record::Note(_) | Record::Media(_) => {}
        }
        refs.extend(self.citations());
        refs.extend(self.notes());
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

trait HasNotes {
    fn note_list(&self) -> &[Handle];
}
macro_rules! has_notes {
    ($($t:ty),*) => { $(impl HasNotes for $t { fn note_list(&self) -> &[Handle] { &self.notes } })* };
}
has_notes!(Person, Family, Event, Place, Citation, Source, Repository, Media);
impl HasNotes for Note {
    fn note_list(&self) -> &[Handle] {
        &[]
    }
}
fn record_notes<T: HasNotes>(r: &T) -> &[Handle] {
    r.note_list()
}
