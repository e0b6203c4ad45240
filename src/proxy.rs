//! Script-facing facades over native records.
//!
//! Each category has a registry of named attributes. `gramps_id` and `handle`
//! are fixed when the proxy is made; everything else is computed from the
//! proxy's record snapshot on every access. Setters change that snapshot,
//! committing writes it back to the database. Absent relationships come back
//! as [`Value::Null`].

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::database::{Database, Transaction};
use crate::error::{Result, SupertoolError};
use crate::record::*;
use crate::value::{Arguments, Object, Value};

struct ProxyInner {
    db: Arc<Database>,
    category: Category,
    handle: Handle,
    gramps_id: String,
    record: RefCell<Record>,
    role: Option<String>,
    commit_ok: Cell<bool>,
}

#[derive(Clone)]
pub struct Proxy {
    inner: Rc<ProxyInner>,
}

impl Proxy {
    pub fn new(db: &Arc<Database>, handle: Handle, record: Record) -> Self {
        Self::with_role(db, handle, record, None)
    }

    fn with_role(db: &Arc<Database>, handle: Handle, record: Record, role: Option<String>) -> Self {
        Proxy {
            inner: Rc::new(ProxyInner {
                db: Arc::clone(db),
                category: record.category(),
                handle,
                gramps_id: record.gramps_id().to_string(),
                record: RefCell::new(record),
                role,
                commit_ok: Cell::new(true),
            }),
        }
    }

    /// Fetches the record and wraps it; a vanished handle is an error.
    pub fn load(db: &Arc<Database>, category: Category, handle: Handle) -> Result<Self> {
        let record = db.get(category, handle)?;
        Ok(Self::new(db, handle, record))
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }
    pub fn category(&self) -> Category {
        self.inner.category
    }
    pub fn handle(&self) -> Handle {
        self.inner.handle
    }
    pub fn gramps_id(&self) -> &str {
        &self.inner.gramps_id
    }
    pub fn namespace(&self) -> &'static str {
        self.inner.category.namespace()
    }
    pub fn role(&self) -> Option<&str> {
        self.inner.role.as_deref()
    }
    pub fn record(&self) -> Ref<'_, Record> {
        self.inner.record.borrow()
    }
    fn record_mut(&self) -> RefMut<'_, Record> {
        self.inner.record.borrow_mut()
    }
    /// A copy of the current (possibly modified) record.
    pub fn snapshot(&self) -> Record {
        self.inner.record.borrow().clone()
    }
    pub fn commit_ok(&self) -> bool {
        self.inner.commit_ok.get()
    }
    pub fn set_commit_ok(&self, ok: bool) {
        self.inner.commit_ok.set(ok)
    }

    /// Writes the snapshot back inside the transaction.
    pub fn commit(&self, transaction: &mut Transaction) -> Result<()> {
        self.inner.db.commit(transaction, self.handle(), self.snapshot())
    }

    // ------------- Attributes -------------
    /// `Ok(None)` when the category has no attribute of that name.
    pub fn attribute(&self, name: &str) -> Result<Option<Value>> {
        match registry(self.category()).find(|def| def.name == name) {
            Some(def) => (def.get)(self).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_attribute(&self, name: &str, value: &Value) -> Result<()> {
        match registry(self.category()).find(|def| def.name == name) {
            Some(AttributeDef { set: Some(set), .. }) => set(self, value),
            Some(_) => Err(SupertoolError::Script(format!(
                "AttributeError: attribute '{}' of {} is read-only",
                name,
                self.namespace()
            ))),
            None => Err(SupertoolError::attribute(self.namespace(), name)),
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        match name {
            "add_tag" | "remove_tag" => true,
            "set_attribute" => self.record().attributes().is_some(),
            _ => false,
        }
    }

    pub fn call_method(&self, name: &str, args: &Arguments) -> Result<Value> {
        match name {
            "add_tag" => {
                args.expect("add_tag", 1, 1, &[])?;
                let tag = text_argument("add_tag", &args.positional[0])?;
                let mut record = self.record_mut();
                if !record.tags().contains(&tag) {
                    record.tags_mut().push(tag);
                }
                Ok(Value::None)
            }
            "remove_tag" => {
                args.expect("remove_tag", 1, 1, &[])?;
                let tag = text_argument("remove_tag", &args.positional[0])?;
                self.record_mut().tags_mut().retain(|t| *t != tag);
                Ok(Value::None)
            }
            "set_attribute" => {
                args.expect("set_attribute", 2, 2, &[])?;
                let key = text_argument("set_attribute", &args.positional[0])?;
                let value = text_argument("set_attribute", &args.positional[1])?;
                let mut record = self.record_mut();
                let attributes = record
                    .attributes_mut()
                    .ok_or_else(|| SupertoolError::attribute(self.namespace(), "set_attribute"))?;
                match attributes.iter_mut().find(|a| a.key == key) {
                    Some(existing) => existing.value = value,
                    None => attributes.push(Attribute { key, value }),
                }
                Ok(Value::None)
            }
            _ => Err(SupertoolError::attribute(self.namespace(), name)),
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.category() == other.category() && self.handle() == other.handle()
    }
}
impl Eq for Proxy {}
impl Ord for Proxy {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.category(), self.handle()).cmp(&(other.category(), other.handle()))
    }
}
impl PartialOrd for Proxy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.namespace(), self.gramps_id())
    }
}

fn text_argument(function: &str, value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(_) | Value::Float(_) => Ok(value.to_string()),
        other => Err(SupertoolError::Type(format!(
            "{function}() expected str, got {}",
            other.type_name()
        ))),
    }
}

// ------------- Registry -------------
pub type Getter = fn(&Proxy) -> Result<Value>;
pub type Setter = fn(&Proxy, &Value) -> Result<()>;

pub struct AttributeDef {
    pub name: &'static str,
    pub get: Getter,
    pub set: Option<Setter>,
}

const fn read(name: &'static str, get: Getter) -> AttributeDef {
    AttributeDef { name, get, set: None }
}
const fn write(name: &'static str, get: Getter, set: Setter) -> AttributeDef {
    AttributeDef { name, get, set: Some(set) }
}

/// Every attribute a proxy of the category exposes, common ones first.
pub fn registry(category: Category) -> impl Iterator<Item = &'static AttributeDef> {
    let specific: &'static [AttributeDef] = match category {
        Category::Person => PERSON,
        Category::Family => FAMILY,
        Category::Event => EVENT,
        Category::Place => PLACE,
        Category::Citation => CITATION,
        Category::Source => SOURCE,
        Category::Repository => REPOSITORY,
        Category::Note => NOTE,
        Category::Media => MEDIA,
    };
    COMMON.iter().chain(specific.iter())
}

pub fn attribute_names(category: Category) -> Vec<&'static str> {
    registry(category).map(|def| def.name).collect()
}

const COMMON: &[AttributeDef] = &[
    read("gramps_id", |p| Ok(Value::from(p.gramps_id()))),
    read("handle", |p| Ok(Value::Int(p.handle() as i64))),
    read("namespace", |p| Ok(Value::from(p.namespace()))),
    read("tags", |p| {
        Ok(Value::list(p.record().tags().iter().map(|t| Value::from(t.as_str())).collect()))
    }),
    write("commit_ok", |p| Ok(Value::Bool(p.commit_ok())), |p, v| {
        p.set_commit_ok(v.truthy());
        Ok(())
    }),
];

const PERSON: &[AttributeDef] = &[
    read("name", |p| person(p, |r| Value::from(r.primary_name.to_string()))),
    read("names", |p| {
        person(p, |r| {
            Value::list(
                std::iter::once(&r.primary_name)
                    .chain(r.alternate_names.iter())
                    .map(|n| Value::from(n.to_string()))
                    .collect(),
            )
        })
    }),
    read("nameobjs", |p| {
        person(p, |r| {
            Value::list(
                std::iter::once(&r.primary_name)
                    .chain(r.alternate_names.iter())
                    .map(name_object)
                    .collect(),
            )
        })
    }),
    read("gender", |p| person(p, |r| Value::from(r.gender.code()))),
    read("birth", |p| {
        let handle = person(p, |r| r.birth_ref_index.and_then(|i| r.event_refs.get(i)).map(|e| e.event))?;
        related(p, Category::Event, handle)
    }),
    read("death", |p| {
        let handle = person(p, |r| r.death_ref_index.and_then(|i| r.event_refs.get(i)).map(|e| e.event))?;
        related(p, Category::Event, handle)
    }),
    read("events", |p| {
        let refs = person(p, |r| r.event_refs.clone())?;
        role_events(p, &refs)
    }),
    read("families", |p| {
        let handles = person(p, |r| r.families.clone())?;
        related_list(p, Category::Family, &handles)
    }),
    read("parent_families", |p| {
        let handles = person(p, |r| r.parent_families.clone())?;
        related_list(p, Category::Family, &handles)
    }),
    read("citations", citations),
    read("notes", notes),
    read("attributes", attributes),
];

const FAMILY: &[AttributeDef] = &[
    read("father", |p| {
        let handle = family(p, |r| r.father)?;
        related(p, Category::Person, handle)
    }),
    read("mother", |p| {
        let handle = family(p, |r| r.mother)?;
        related(p, Category::Person, handle)
    }),
    read("children", |p| {
        let handles = family(p, |r| r.children.clone())?;
        related_list(p, Category::Person, &handles)
    }),
    read("events", |p| {
        let handles: Vec<Handle> = family(p, |r| r.event_refs.iter().map(|e| e.event).collect())?;
        related_list(p, Category::Event, &handles)
    }),
    read("citations", citations),
    read("notes", notes),
    read("attributes", attributes),
];

const EVENT: &[AttributeDef] = &[
    read("type", |p| event(p, |r| Value::from(r.kind.as_str()))),
    read("date", |p| event(p, |r| Value::Date(r.date))),
    write(
        "description",
        |p| event(p, |r| Value::from(r.description.as_str())),
        |p, v| {
            let text = text_argument("description", v)?;
            event_mut(p, |r| r.description = text)
        },
    ),
    read("place", |p| {
        let handle = event(p, |r| r.place)?;
        related(p, Category::Place, handle)
    }),
    read("placename", |p| match event(p, |r| r.place)? {
        Some(handle) => Ok(Value::from(place_display(p.db(), handle)?)),
        None => Ok(Value::Null),
    }),
    read("role", |p| Ok(p.role().map(Value::from).unwrap_or(Value::Null))),
    read("refs", event_refs),
    read("participants", |p| {
        let mut people = Vec::new();
        for (category, handle) in p.db().find_backlinks(p.handle(), &[Category::Person, Category::Family])? {
            match p.db().get(category, handle)? {
                Record::Family(f) => {
                    for parent in [f.father, f.mother].into_iter().flatten() {
                        people.push(Value::Proxy(Proxy::load(p.db(), Category::Person, parent)?));
                    }
                }
                record => people.push(Value::Proxy(Proxy::new(p.db(), handle, record))),
            }
        }
        Ok(Value::list(people))
    }),
    read("citations", citations),
    read("notes", notes),
    read("attributes", attributes),
];

const PLACE: &[AttributeDef] = &[
    write(
        "name",
        |p| place(p, |r| Value::from(r.name.as_str())),
        |p, v| {
            let text = text_argument("name", v)?;
            place_mut(p, |r| r.name = text)
        },
    ),
    read("longname", |p| Ok(Value::from(place_display(p.db(), p.handle())?))),
    write(
        "title",
        |p| place(p, |r| Value::from(r.title.as_str())),
        |p, v| {
            let text = text_argument("title", v)?;
            place_mut(p, |r| r.title = text)
        },
    ),
    read("type", |p| place(p, |r| Value::from(r.kind.as_str()))),
    read("code", |p| place(p, |r| Value::from(r.code.as_str()))),
    read("lat", |p| place(p, |r| Value::from(r.lat.as_str()))),
    read("long", |p| place(p, |r| Value::from(r.long.as_str()))),
    read("enclosed_by", |p| {
        let handles = place(p, |r| r.enclosed_by.clone())?;
        related_list(p, Category::Place, &handles)
    }),
    read("encloses", |p| backlinks(p, &[Category::Place])),
    read("citations", citations),
    read("notes", notes),
];

const CITATION: &[AttributeDef] = &[
    write(
        "page",
        |p| citation(p, |r| Value::from(r.page.as_str())),
        |p, v| {
            let text = text_argument("page", v)?;
            citation_mut(p, |r| r.page = text)
        },
    ),
    write(
        "confidence",
        |p| citation(p, |r| Value::Int(r.confidence)),
        |p, v| match v.as_int() {
            Some(level) => citation_mut(p, |r| r.confidence = level),
            None => Err(SupertoolError::Type(format!(
                "confidence must be an int, not {}",
                v.type_name()
            ))),
        },
    ),
    read("source", |p| {
        let handle = citation(p, |r| r.source)?;
        related(p, Category::Source, handle)
    }),
    read("notes", notes),
    read("note", |p| {
        let first = p.record().notes().first().copied();
        match first {
            Some(handle) => match p.db().get(Category::Note, handle)? {
                Record::Note(n) => Ok(Value::from(n.text)),
                _ => Ok(Value::from("")),
            },
            None => Ok(Value::from("")),
        }
    }),
    read("citators", |p| {
        let mut citators = match backlinks(p, &[Category::Event])? {
            Value::List(items) => items.borrow().clone(),
            _ => Vec::new(),
        };
        if let Value::List(people) = backlinks(p, &[Category::Person])? {
            citators.extend(people.borrow().iter().cloned());
        }
        Ok(Value::list(citators))
    }),
    read("attributes", attributes),
];

const SOURCE: &[AttributeDef] = &[
    write(
        "title",
        |p| source(p, |r| Value::from(r.title.as_str())),
        |p, v| {
            let text = text_argument("title", v)?;
            source_mut(p, |r| r.title = text)
        },
    ),
    write(
        "author",
        |p| source(p, |r| Value::from(r.author.as_str())),
        |p, v| {
            let text = text_argument("author", v)?;
            source_mut(p, |r| r.author = text)
        },
    ),
    write(
        "abbrev",
        |p| source(p, |r| Value::from(r.abbrev.as_str())),
        |p, v| {
            let text = text_argument("abbrev", v)?;
            source_mut(p, |r| r.abbrev = text)
        },
    ),
    write(
        "pubinfo",
        |p| source(p, |r| Value::from(r.pubinfo.as_str())),
        |p, v| {
            let text = text_argument("pubinfo", v)?;
            source_mut(p, |r| r.pubinfo = text)
        },
    ),
    read("repositories", |p| {
        let handles = source(p, |r| r.repositories.clone())?;
        related_list(p, Category::Repository, &handles)
    }),
    read("citations", |p| backlinks(p, &[Category::Citation])),
    read("notes", notes),
    read("attributes", attributes),
];

const REPOSITORY: &[AttributeDef] = &[
    write(
        "name",
        |p| repository(p, |r| Value::from(r.name.as_str())),
        |p, v| {
            let text = text_argument("name", v)?;
            repository_mut(p, |r| r.name = text)
        },
    ),
    read("type", |p| repository(p, |r| Value::from(r.kind.as_str()))),
    read("sources", |p| backlinks(p, &[Category::Source])),
];

const NOTE: &[AttributeDef] = &[write(
    "text",
    |p| note(p, |r| Value::from(r.text.as_str())),
    |p, v| {
        let text = text_argument("text", v)?;
        note_mut(p, |r| r.text = text)
    },
)];

const MEDIA: &[AttributeDef] = &[
    read("path", |p| media(p, |r| Value::from(r.path.as_str()))),
    read("mime", |p| media(p, |r| Value::from(r.mime.as_str()))),
    write(
        "desc",
        |p| media(p, |r| Value::from(r.desc.as_str())),
        |p, v| {
            let text = text_argument("desc", v)?;
            media_mut(p, |r| r.desc = text)
        },
    ),
    read("checksum", |p| media(p, |r| Value::from(r.checksum.as_str()))),
    read("date", |p| media(p, |r| Value::Date(r.date))),
    read("citations", citations),
    read("notes", notes),
    read("attributes", attributes),
];

// ------------- Typed access -------------
macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        fn $get<T>(p: &Proxy, f: impl FnOnce(&$ty) -> T) -> Result<T> {
            match &*p.record() {
                Record::$variant(r) => Ok(f(r)),
                other => Err(mismatch(p, other)),
            }
        }
        #[allow(dead_code)]
        fn $get_mut(p: &Proxy, f: impl FnOnce(&mut $ty)) -> Result<()> {
            let mut record = p.record_mut();
            match &mut *record {
                Record::$variant(r) => {
                    f(r);
                    Ok(())
                }
                other => Err(mismatch(p, other)),
            }
        }
    };
}

typed_access!(person, person_mut, Person, Person);
typed_access!(family, family_mut, Family, Family);
typed_access!(event, event_mut, Event, Event);
typed_access!(place, place_mut, Place, Place);
typed_access!(citation, citation_mut, Citation, Citation);
typed_access!(source, source_mut, Source, Source);
typed_access!(repository, repository_mut, Repository, Repository);
typed_access!(note, note_mut, Note, Note);
typed_access!(media, media_mut, Media, Media);

fn mismatch(p: &Proxy, record: &Record) -> SupertoolError {
    SupertoolError::Invariant(format!(
        "{} proxy {} holds a {} record",
        p.namespace(),
        p.handle(),
        record.category()
    ))
}

// ------------- Relationships -------------
fn related(p: &Proxy, category: Category, handle: Option<Handle>) -> Result<Value> {
    match handle {
        Some(h) => Ok(Value::Proxy(Proxy::load(p.db(), category, h)?)),
        None => Ok(Value::Null),
    }
}

fn related_list(p: &Proxy, category: Category, handles: &[Handle]) -> Result<Value> {
    let items = handles
        .iter()
        .map(|h| Proxy::load(p.db(), category, *h).map(Value::Proxy))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::list(items))
}

fn role_events(p: &Proxy, refs: &[EventRef]) -> Result<Value> {
    let items = refs
        .iter()
        .map(|r| {
            let record = p.db().get(Category::Event, r.event)?;
            Ok(Value::Proxy(Proxy::with_role(p.db(), r.event, record, Some(r.role.clone()))))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::list(items))
}

fn name_object(name: &Name) -> Value {
    Value::Object(Rc::new(Object {
        kind: "Name",
        fields: vec![
            ("first_name", Value::from(name.first_name.as_str())),
            ("surname", Value::from(name.surname.as_str())),
            ("type", Value::from(name.kind.as_str())),
        ],
        text: name.to_string(),
    }))
}

/// The references people and families hold to this event, each with its role
/// and the record holding it.
fn event_refs(p: &Proxy) -> Result<Value> {
    let mut items = Vec::new();
    for (category, handle) in p.db().find_backlinks(p.handle(), &[Category::Person, Category::Family])? {
        let record = p.db().get(category, handle)?;
        let refs = match &record {
            Record::Person(person) => person.event_refs.clone(),
            Record::Family(family) => family.event_refs.clone(),
            _ => Vec::new(),
        };
        let referrer = Value::Proxy(Proxy::new(p.db(), handle, record));
        for r in refs.into_iter().filter(|r| r.event == p.handle()) {
            items.push(Value::Object(Rc::new(Object {
                kind: "EventRef",
                fields: vec![
                    ("ref", Value::Int(r.event as i64)),
                    ("role", Value::from(r.role.as_str())),
                    ("referrer", referrer.clone()),
                ],
                text: r.role,
            })));
        }
    }
    Ok(Value::list(items))
}

fn backlinks(p: &Proxy, include: &[Category]) -> Result<Value> {
    let items = p
        .db()
        .find_backlinks(p.handle(), include)?
        .into_iter()
        .map(|(category, handle)| Proxy::load(p.db(), category, handle).map(Value::Proxy))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::list(items))
}

fn citations(p: &Proxy) -> Result<Value> {
    let handles = p.record().citations().to_vec();
    related_list(p, Category::Citation, &handles)
}

fn notes(p: &Proxy) -> Result<Value> {
    let handles = p.record().notes().to_vec();
    related_list(p, Category::Note, &handles)
}

fn attributes(p: &Proxy) -> Result<Value> {
    let items = p
        .record()
        .attributes()
        .unwrap_or_default()
        .iter()
        .map(|a| Value::tuple(vec![Value::from(a.key.as_str()), Value::from(a.value.as_str())]))
        .collect();
    Ok(Value::list(items))
}

/// The place name followed by the names of the places enclosing it.
fn place_display(db: &Arc<Database>, handle: Handle) -> Result<String> {
    let mut names = Vec::new();
    let mut current = Some(handle);
    let mut seen = Vec::new();
    while let Some(h) = current {
        if seen.contains(&h) {
            break;
        }
        seen.push(h);
        match db.get(Category::Place, h)? {
            Record::Place(place) => {
                if !place.name.is_empty() {
                    names.push(place.name.clone());
                } else if !place.title.is_empty() {
                    names.push(place.title.clone());
                }
                current = place.enclosed_by.first().copied();
            }
            _ => break,
        }
    }
    Ok(names.join(", "))
}
