// Wizard form state (sectioned by domain)
//
// Each section mirrors the JSON contract consumed by the platform's setup endpoints,
// so field names serialize in camelCase. Sections are always present; an empty section
// is all empty strings, never "missing".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Database,
    School,
    Admin,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Database, Section::School, Section::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Database => "database",
            Section::School => "school",
            Section::Admin => "admin",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = FieldUpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "database" => Ok(Section::Database),
            "school" => Ok(Section::School),
            "admin" => Ok(Section::Admin),
            other => Err(FieldUpdateError::UnknownSection(other.to_string())),
        }
    }
}

/// Uploaded school logo. Bytes are base64 inside the persisted JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoFile {
    pub file_name: String,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSection {
    pub name: String,
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// "postgres" | "mysql" | "sqlite" | "mssql"
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolSection {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub brand_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<LogoFile>,
    /// Where the logo was picked from. The terminal wizard shows it as the logo field's value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_preview: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminSection {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardFormState {
    pub database: DatabaseSection,
    pub school: SchoolSection,
    pub admin: AdminSection,
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

impl DatabaseSection {
    pub fn is_complete(&self) -> bool {
        filled(&self.host) && filled(&self.name) && filled(&self.username) && filled(&self.password)
    }
}

impl SchoolSection {
    pub fn is_complete(&self) -> bool {
        filled(&self.name) && filled(&self.phone) && filled(&self.address)
    }
}

impl AdminSection {
    pub fn is_complete(&self) -> bool {
        filled(&self.first_name)
            && filled(&self.last_name)
            && filled(&self.email)
            && filled(&self.password)
            && filled(&self.confirm_password)
    }
}

impl WizardFormState {
    /// Overwrite exactly one field. Nothing is ever removed from a section.
    pub fn apply(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Database(f) => {
                let s = &mut self.database;
                match f {
                    DatabaseField::Name(v) => s.name = v,
                    DatabaseField::Host(v) => s.host = v,
                    DatabaseField::Username(v) => s.username = v,
                    DatabaseField::Password(v) => s.password = v,
                    DatabaseField::Port(v) => s.port = v,
                    DatabaseField::Type(v) => s.db_type = v,
                }
            }
            FieldUpdate::School(f) => {
                let s = &mut self.school;
                match f {
                    SchoolField::Name(v) => s.name = v,
                    SchoolField::Phone(v) => s.phone = v,
                    SchoolField::Address(v) => s.address = v,
                    SchoolField::BrandColor(v) => s.brand_color = v,
                    SchoolField::Logo(v) => s.logo = v,
                    SchoolField::LogoPreview(v) => s.logo_preview = v,
                }
            }
            FieldUpdate::Admin(f) => {
                let s = &mut self.admin;
                match f {
                    AdminField::FirstName(v) => s.first_name = v,
                    AdminField::LastName(v) => s.last_name = v,
                    AdminField::Email(v) => s.email = v,
                    AdminField::Password(v) => s.password = v,
                    AdminField::ConfirmPassword(v) => s.confirm_password = v,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseField {
    Name(String),
    Host(String),
    Username(String),
    Password(String),
    Port(Option<u16>),
    Type(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchoolField {
    Name(String),
    Phone(String),
    Address(String),
    BrandColor(String),
    Logo(Option<LogoFile>),
    LogoPreview(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminField {
    FirstName(String),
    LastName(String),
    Email(String),
    Password(String),
    ConfirmPassword(String),
}

/// A single-field overwrite, tagged by section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Database(DatabaseField),
    School(SchoolField),
    Admin(AdminField),
}

/// Untyped value as handed over by a string-keyed caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
    Blob(LogoFile),
    Empty,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldUpdateError {
    #[error("unknown section '{0}'")]
    UnknownSection(String),
    #[error("unknown field '{field}' in section '{section}'")]
    UnknownField { section: Section, field: String },
    #[error("field '{field}' in section '{section}' does not accept this value")]
    WrongValueKind { section: Section, field: String },
}

impl FieldUpdate {
    pub fn section(&self) -> Section {
        match self {
            FieldUpdate::Database(_) => Section::Database,
            FieldUpdate::School(_) => Section::School,
            FieldUpdate::Admin(_) => Section::Admin,
        }
    }

    /// Field name as it appears in the persisted JSON.
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldUpdate::Database(f) => match f {
                DatabaseField::Name(_) => "name",
                DatabaseField::Host(_) => "host",
                DatabaseField::Username(_) => "username",
                DatabaseField::Password(_) => "password",
                DatabaseField::Port(_) => "port",
                DatabaseField::Type(_) => "type",
            },
            FieldUpdate::School(f) => match f {
                SchoolField::Name(_) => "name",
                SchoolField::Phone(_) => "phone",
                SchoolField::Address(_) => "address",
                SchoolField::BrandColor(_) => "brandColor",
                SchoolField::Logo(_) => "logo",
                SchoolField::LogoPreview(_) => "logoPreview",
            },
            FieldUpdate::Admin(f) => match f {
                AdminField::FirstName(_) => "firstName",
                AdminField::LastName(_) => "lastName",
                AdminField::Email(_) => "email",
                AdminField::Password(_) => "password",
                AdminField::ConfirmPassword(_) => "confirmPassword",
            },
        }
    }

    /// Build a typed update from string keys (`"school"`, `"brandColor"`).
    pub fn from_parts(
        section: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<FieldUpdate, FieldUpdateError> {
        let section: Section = section.parse()?;
        let wrong_kind = || FieldUpdateError::WrongValueKind {
            section,
            field: field.to_string(),
        };

        let text = |value: FieldValue| -> Result<String, FieldUpdateError> {
            match value {
                FieldValue::Text(s) => Ok(s),
                FieldValue::Number(n) => Ok(n.to_string()),
                FieldValue::Empty => Ok(String::new()),
                FieldValue::Blob(_) => Err(wrong_kind()),
            }
        };
        let optional_text = |value: FieldValue| -> Result<Option<String>, FieldUpdateError> {
            match value {
                FieldValue::Empty => Ok(None),
                other => text(other).map(Some),
            }
        };

        let update = match (section, field) {
            (Section::Database, "name") => FieldUpdate::Database(DatabaseField::Name(text(value)?)),
            (Section::Database, "host") => FieldUpdate::Database(DatabaseField::Host(text(value)?)),
            (Section::Database, "username") => {
                FieldUpdate::Database(DatabaseField::Username(text(value)?))
            }
            (Section::Database, "password") => {
                FieldUpdate::Database(DatabaseField::Password(text(value)?))
            }
            (Section::Database, "port") => {
                let port = match value {
                    FieldValue::Empty => None,
                    FieldValue::Number(n) => Some(u16::try_from(n).map_err(|_| wrong_kind())?),
                    FieldValue::Text(s) if s.trim().is_empty() => None,
                    FieldValue::Text(s) => Some(s.trim().parse::<u16>().map_err(|_| wrong_kind())?),
                    FieldValue::Blob(_) => return Err(wrong_kind()),
                };
                FieldUpdate::Database(DatabaseField::Port(port))
            }
            (Section::Database, "type") => {
                FieldUpdate::Database(DatabaseField::Type(optional_text(value)?))
            }
            (Section::School, "name") => FieldUpdate::School(SchoolField::Name(text(value)?)),
            (Section::School, "phone") => FieldUpdate::School(SchoolField::Phone(text(value)?)),
            (Section::School, "address") => FieldUpdate::School(SchoolField::Address(text(value)?)),
            (Section::School, "brandColor") => {
                FieldUpdate::School(SchoolField::BrandColor(text(value)?))
            }
            (Section::School, "logo") => {
                let logo = match value {
                    FieldValue::Blob(b) => Some(b),
                    FieldValue::Empty => None,
                    _ => return Err(wrong_kind()),
                };
                FieldUpdate::School(SchoolField::Logo(logo))
            }
            (Section::School, "logoPreview") => {
                FieldUpdate::School(SchoolField::LogoPreview(optional_text(value)?))
            }
            (Section::Admin, "firstName") => FieldUpdate::Admin(AdminField::FirstName(text(value)?)),
            (Section::Admin, "lastName") => FieldUpdate::Admin(AdminField::LastName(text(value)?)),
            (Section::Admin, "email") => FieldUpdate::Admin(AdminField::Email(text(value)?)),
            (Section::Admin, "password") => FieldUpdate::Admin(AdminField::Password(text(value)?)),
            (Section::Admin, "confirmPassword") => {
                FieldUpdate::Admin(AdminField::ConfirmPassword(text(value)?))
            }
            (section, field) => {
                return Err(FieldUpdateError::UnknownField {
                    section,
                    field: field.to_string(),
                })
            }
        };
        Ok(update)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
