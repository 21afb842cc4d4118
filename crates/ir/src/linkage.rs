use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible outside the module.
    Public,
    /// Module-local.
    Private,
    /// Declared here, defined elsewhere.
    External,
}

impl Linkage {
    pub fn from_str(s: &str) -> Option<Self> {
        let linkage = match s {
            "public" => Self::Public,
            "private" => Self::Private,
            "external" => Self::External,
            _ => return None,
        };
        Some(linkage)
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::External => "external",
        };
        f.write_str(s)
    }
}
