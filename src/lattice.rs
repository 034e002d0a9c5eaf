use serde::{Deserialize, Serialize};

/// One permission flag mid-evaluation. `Unset` is the merge identity;
/// `Allow`/`Deny` are final; `AllowSome`/`DenySome` mean the deciding rule
/// needs row data that was not supplied; `Mixed` means inputs disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Perm {
    #[default]
    Unset,
    Allow,
    Deny,
    AllowSome,
    DenySome,
    Mixed,
}

impl Perm {
    pub fn is_final(self) -> bool {
        matches!(self, Perm::Allow | Perm::Deny)
    }

    /// Merge with a lower-precedence flag. Associative, not commutative: the
    /// earlier operand dominates, which is how rule order implements
    /// first-match-wins. An earlier maybe-match whose outcome differs from
    /// the fallback cannot be resolved without row data, hence `Mixed`.
    pub fn merge(self, later: Perm) -> Perm {
        match self {
            Perm::Unset => later,
            Perm::Allow | Perm::Deny => self,
            Perm::AllowSome => match later {
                Perm::Allow => Perm::Allow,
                Perm::Unset | Perm::AllowSome => Perm::AllowSome,
                _ => Perm::Mixed,
            },
            Perm::DenySome => match later {
                Perm::Deny => Perm::Deny,
                Perm::Unset | Perm::DenySome => Perm::DenySome,
                _ => Perm::Mixed,
            },
            Perm::Mixed => Perm::Mixed,
        }
    }

    /// Collapse once all inputs are in hand. Leftover `Unset` means no rule
    /// and no default spoke for this bit; it resolves closed.
    pub fn to_verdict(self) -> Verdict {
        match self {
            Perm::Allow | Perm::AllowSome => Verdict::Allow,
            Perm::Deny | Perm::DenySome | Perm::Unset => Verdict::Deny,
            Perm::Mixed => Verdict::Mixed,
        }
    }
}

/// Fully-resolved flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Allow,
    Deny,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermBit {
    Read,
    Create,
    Update,
    Delete,
    SchemaEdit,
    /// Reserved for a future permission; merged and folded like any other bit.
    Reserved,
}

pub const ALL_BITS: [PermBit; 6] = [
    PermBit::Read,
    PermBit::Create,
    PermBit::Update,
    PermBit::Delete,
    PermBit::SchemaEdit,
    PermBit::Reserved,
];

impl PermBit {
    fn index(self) -> usize {
        match self {
            PermBit::Read => 0,
            PermBit::Create => 1,
            PermBit::Update => 2,
            PermBit::Delete => 3,
            PermBit::SchemaEdit => 4,
            PermBit::Reserved => 5,
        }
    }
}

/// Six independent flags, one per permission bit. Serves both as a rule's
/// permission delta (finals on touched bits, `Unset` elsewhere) and as the
/// evaluation accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    bits: [Perm; 6],
}

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn uniform(p: Perm) -> Self {
        Self { bits: [p; 6] }
    }

    pub fn get(&self, bit: PermBit) -> Perm {
        self.bits[bit.index()]
    }

    pub fn set(&mut self, bit: PermBit, p: Perm) {
        self.bits[bit.index()] = p;
    }

    pub fn with(mut self, bit: PermBit, p: Perm) -> Self {
        self.set(bit, p);
        self
    }

    pub fn read(&self) -> Perm {
        self.get(PermBit::Read)
    }

    pub fn merge(self, later: Self) -> Self {
        let mut out = self;
        for i in 0..6 {
            out.bits[i] = out.bits[i].merge(later.bits[i]);
        }
        out
    }

    /// Downgrade finals to their row-dependent counterparts. Applied to a
    /// rule's delta when its predicate needed a row that was not supplied.
    pub fn weaken(self) -> Self {
        let mut out = self;
        for bit in out.bits.iter_mut() {
            *bit = match *bit {
                Perm::Allow => Perm::AllowSome,
                Perm::Deny => Perm::DenySome,
                other => other,
            };
        }
        out
    }

    pub fn to_mixed(self) -> MixedPermissionSet {
        MixedPermissionSet {
            bits: self.bits.map(Perm::to_verdict),
        }
    }
}

/// Resolved permission set, once every contributing rule set has spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedPermissionSet {
    bits: [Verdict; 6],
}

impl MixedPermissionSet {
    pub fn uniform(v: Verdict) -> Self {
        Self { bits: [v; 6] }
    }

    pub fn get(&self, bit: PermBit) -> Verdict {
        self.bits[bit.index()]
    }

    pub fn read(&self) -> Verdict {
        self.get(PermBit::Read)
    }

    pub fn is_uniformly(&self, v: Verdict) -> bool {
        self.bits.iter().all(|b| *b == v)
    }
}

/// Read flag at table granularity. `MixedColumns` means columns disagree but
/// none of them depends on row data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableRead {
    Allow,
    Deny,
    Mixed,
    MixedColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePermissionSet {
    pub read: TableRead,
    pub create: Verdict,
    pub update: Verdict,
    pub delete: Verdict,
    pub schema_edit: Verdict,
    pub reserved: Verdict,
}

impl TablePermissionSet {
    /// Collapse for document-level folding, where column disagreement is just
    /// disagreement.
    pub fn to_mixed(&self) -> MixedPermissionSet {
        let read = match self.read {
            TableRead::Allow => Verdict::Allow,
            TableRead::Deny => Verdict::Deny,
            TableRead::Mixed | TableRead::MixedColumns => Verdict::Mixed,
        };
        MixedPermissionSet {
            bits: [
                read,
                self.create,
                self.update,
                self.delete,
                self.schema_edit,
                self.reserved,
            ],
        }
    }
}

fn fold_verdicts(verdicts: impl Iterator<Item = Verdict> + Clone) -> Verdict {
    let mut iter = verdicts;
    let Some(first) = iter.next() else {
        return Verdict::Deny;
    };
    if iter.all(|v| v == first) {
        first
    } else {
        Verdict::Mixed
    }
}

/// Combine column-scoped verdicts into a table verdict. The read bit keeps
/// track of whether disagreement is purely between columns.
pub fn fold_table(verdicts: &[MixedPermissionSet]) -> TablePermissionSet {
    let read = {
        let reads = verdicts.iter().map(|v| v.get(PermBit::Read));
        if reads.clone().all(|r| r == Verdict::Allow) && !verdicts.is_empty() {
            TableRead::Allow
        } else if reads.clone().all(|r| r == Verdict::Deny) || verdicts.is_empty() {
            TableRead::Deny
        } else if reads.clone().any(|r| r == Verdict::Mixed) {
            TableRead::Mixed
        } else {
            TableRead::MixedColumns
        }
    };
    let fold = |bit: PermBit| fold_verdicts(verdicts.iter().map(move |v| v.get(bit)));
    TablePermissionSet {
        read,
        create: fold(PermBit::Create),
        update: fold(PermBit::Update),
        delete: fold(PermBit::Delete),
        schema_edit: fold(PermBit::SchemaEdit),
        reserved: fold(PermBit::Reserved),
    }
}

/// Combine the document-default verdict with every table verdict.
pub fn fold_doc(
    doc_default: MixedPermissionSet,
    tables: &[TablePermissionSet],
) -> MixedPermissionSet {
    let mut all = Vec::with_capacity(tables.len() + 1);
    all.push(doc_default);
    all.extend(tables.iter().map(TablePermissionSet::to_mixed));
    let fold = |bit: PermBit| fold_verdicts(all.iter().map(move |v| v.get(bit)));
    MixedPermissionSet {
        bits: [
            fold(PermBit::Read),
            fold(PermBit::Create),
            fold(PermBit::Update),
            fold(PermBit::Delete),
            fold(PermBit::SchemaEdit),
            fold(PermBit::Reserved),
        ],
    }
}
