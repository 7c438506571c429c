use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use core::cell::RefCell;

use hashbrown::HashMap;

use log::{error, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::property::{ListenerId, Property};
use crate::value::{Value, ValueKind};

/// Number of bytes reserved at the start of the region for the presence
/// flags.
pub const HEADER_LENGTH: usize = 2;

/// A byte-addressed non-volatile region.
pub trait Storage {
    /// Returns the size of the region in bytes.
    fn capacity(&self) -> usize;

    /// Fills `buffer` with the bytes stored from `address`.
    ///
    /// # Errors
    ///
    /// Fails when the range exceeds the region or the medium is unreadable.
    fn read(&mut self, address: usize, buffer: &mut [u8]) -> Result<()>;

    /// Writes `bytes` from `address`.
    ///
    /// Writes may be buffered until [`Storage::commit`].
    ///
    /// # Errors
    ///
    /// Fails when the range exceeds the region or the medium is unwritable.
    fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()>;

    /// Flushes buffered writes to the medium.
    ///
    /// # Errors
    ///
    /// Fails when the medium is unwritable.
    fn commit(&mut self) -> Result<()>;
}

/// A [`Storage`] held in memory.
///
/// A new region is filled with `0xFF`, like an erased flash page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStorage(Vec<u8>);

impl MemoryStorage {
    /// Creates an erased [`MemoryStorage`] of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self(vec![0xFF; capacity])
    }

    /// Creates a [`MemoryStorage`] over existing bytes.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the region content.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the storage and returns the region content.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    fn range(&self, address: usize, length: usize) -> Result<core::ops::Range<usize>> {
        let end = address
            .checked_add(length)
            .filter(|end| *end <= self.0.len())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Storage,
                    format!(
                        "range {address}..{} exceeds {} bytes",
                        address.saturating_add(length),
                        self.0.len()
                    ),
                )
            })?;
        Ok(address..end)
    }
}

impl Storage for MemoryStorage {
    fn capacity(&self) -> usize {
        self.0.len()
    }

    fn read(&mut self, address: usize, buffer: &mut [u8]) -> Result<()> {
        let range = self.range(address, buffer.len())?;
        buffer.copy_from_slice(&self.0[range]);
        Ok(())
    }

    fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
        let range = self.range(address, bytes.len())?;
        self.0[range].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A batch of settings persisted and reset together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsGroup {
    /// Network configuration.
    Network,
    /// Application properties.
    Application,
}

impl SettingsGroup {
    /// Returns the address of the presence flag of the group.
    #[must_use]
    pub const fn flag_address(self) -> usize {
        match self {
            Self::Network => 0,
            Self::Application => 1,
        }
    }

    /// Returns the value of the presence flag when the group is stored.
    #[must_use]
    pub const fn flag(self) -> u8 {
        match self {
            Self::Network => 0x61,
            Self::Application => 0x65,
        }
    }

    const fn index(self) -> usize {
        self.flag_address()
    }
}

/// The persistence binding of a single property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsEntry {
    id: String,
    group: SettingsGroup,
    address: usize,
    kind: ValueKind,
    max_length: u8,
    stored: bool,
}

impl SettingsEntry {
    /// Returns the identifier of the bound property.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the [`SettingsGroup`].
    #[must_use]
    pub const fn group(&self) -> SettingsGroup {
        self.group
    }

    /// Returns the address of the record.
    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    /// Returns the size of the record in bytes.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.kind.storage_width(self.max_length)
    }

    /// Whether the record fits into the region.
    ///
    /// An entry which does not fit keeps its address, but its property is
    /// never persisted.
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        self.stored
    }
}

/// Maps registered properties onto a [`Storage`].
///
/// Records are laid out in registration order right after the
/// [`HEADER_LENGTH`] flag bytes. Each record takes exactly
/// [`ValueKind::storage_width`] bytes, so `address(k + 1)` is always
/// `address(k) + width(k)`, even when an entry is too large to be stored.
///
/// The layout carries no version: changing the registration order or the
/// width of a property makes previously stored records unreadable.
#[derive(Debug)]
pub struct SettingsStore<S: Storage> {
    storage: S,
    entries: Vec<SettingsEntry>,
    index: HashMap<String, usize>,
    next_address: usize,
    present: [bool; 2],
}

impl<S: Storage> SettingsStore<S> {
    /// Creates a [`SettingsStore`] and reads the presence flags.
    pub fn new(mut storage: S) -> Self {
        let mut present = [false; 2];
        for group in [SettingsGroup::Network, SettingsGroup::Application] {
            let mut flag = [0];
            match storage.read(group.flag_address(), &mut flag) {
                Ok(()) => present[group.index()] = flag[0] == group.flag(),
                Err(e) => warn!("Unable to read the {group:?} presence flag: {e}"),
            }
        }

        Self {
            storage,
            entries: Vec::new(),
            index: HashMap::new(),
            next_address: HEADER_LENGTH,
            present,
        }
    }

    /// Whether the bytes of `group` are valid.
    #[must_use]
    pub const fn is_present(&self, group: SettingsGroup) -> bool {
        self.present[group.index()]
    }

    /// Returns the address the next registered entry receives.
    #[must_use]
    pub const fn next_address(&self) -> usize {
        self.next_address
    }

    /// Returns the entry of a property.
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&SettingsEntry> {
        self.index.get(id).map(|index| &self.entries[*index])
    }

    /// Returns the entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[SettingsEntry] {
        &self.entries
    }

    /// Returns the underlying [`Storage`].
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Consumes the store and returns the underlying [`Storage`].
    #[must_use]
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Registers a property and returns the address of its record.
    ///
    /// When `group` is present, the stored value immediately replaces the
    /// current value of the property, without notifying its listeners.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::DuplicateEntry`] if the property identifier is already
    ///   registered. No address is allocated.
    /// - [`ErrorKind::StorageOverflow`] if the record does not fit into the
    ///   region. The address is allocated anyway and the entry is kept,
    ///   but the property is never persisted.
    pub fn register(&mut self, property: &mut Property, group: SettingsGroup) -> Result<usize> {
        if self.index.contains_key(property.id()) {
            return Err(Error::new(
                ErrorKind::DuplicateEntry,
                format!("`{}` is already registered", property.id()),
            ));
        }

        let kind = property.kind();
        let max_length = property.get_max_length();
        let address = self.next_address;
        let width = kind.storage_width(max_length);
        self.next_address += width;

        let stored = address + width <= self.storage.capacity();
        let _ = self.index.insert(property.id().into(), self.entries.len());
        self.entries.push(SettingsEntry {
            id: property.id().into(),
            group,
            address,
            kind,
            max_length,
            stored,
        });

        if !stored {
            error!(
                "Setting `{}` at {address} needs {width} bytes, the region has {}",
                property.id(),
                self.storage.capacity()
            );
            return Err(Error::new(
                ErrorKind::StorageOverflow,
                format!("`{}` does not fit into the region", property.id()),
            ));
        }

        if self.is_present(group) {
            let mut record = vec![0; width];
            match self.storage.read(address, &mut record) {
                Ok(()) => match Value::decode(kind, max_length, &record) {
                    Some(value) => property.load(value),
                    None => warn!("Stored record of `{}` is malformed", property.id()),
                },
                Err(e) => warn!("Unable to read `{}`: {e}", property.id()),
            }
        }

        Ok(address)
    }

    /// Writes the current value of a registered property and commits it.
    ///
    /// The presence flag of the group is left untouched.
    ///
    /// # Errors
    ///
    /// Fails when the property is not registered, when its record does not
    /// fit into the region or when the [`Storage`] fails.
    pub fn save_property(&mut self, property: &Property) -> Result<()> {
        self.write_record(property)?;
        self.storage.commit()
    }

    /// Writes every registered property of `group` found in `properties`,
    /// then the presence flag of the group.
    ///
    /// Records which cannot be written are logged and skipped.
    ///
    /// # Errors
    ///
    /// Fails when the presence flag cannot be written or committed.
    pub fn save_group<'a>(
        &mut self,
        group: SettingsGroup,
        properties: impl IntoIterator<Item = &'a Property>,
    ) -> Result<()> {
        for property in properties {
            if self.entry(property.id()).is_none_or(|entry| entry.group != group) {
                continue;
            }
            if let Err(e) = self.write_record(property) {
                warn!("Skipping setting `{}`: {e}", property.id());
            }
        }

        self.storage.write(group.flag_address(), &[group.flag()])?;
        self.storage.commit()?;
        self.present[group.index()] = true;
        Ok(())
    }

    /// Invalidates `group` by clearing its presence flag.
    ///
    /// The records themselves are not erased.
    ///
    /// # Errors
    ///
    /// Fails when the flag cannot be written or committed.
    pub fn reset(&mut self, group: SettingsGroup) -> Result<()> {
        self.storage.write(group.flag_address(), &[0])?;
        self.storage.commit()?;
        self.present[group.index()] = false;
        Ok(())
    }

    /// Invalidates every group.
    ///
    /// # Errors
    ///
    /// Fails when a flag cannot be written or committed.
    pub fn reset_all(&mut self) -> Result<()> {
        self.reset(SettingsGroup::Network)?;
        self.reset(SettingsGroup::Application)
    }

    fn write_record(&mut self, property: &Property) -> Result<()> {
        let entry = self.entry(property.id()).ok_or_else(|| {
            Error::new(
                ErrorKind::Storage,
                format!("`{}` is not registered", property.id()),
            )
        })?;

        if !entry.stored {
            return Err(Error::new(
                ErrorKind::StorageOverflow,
                format!("`{}` does not fit into the region", property.id()),
            ));
        }

        let address = entry.address;
        let mut record = Vec::with_capacity(entry.width());
        match property.value() {
            Some(value) => value.encode(entry.max_length, &mut record),
            None => Value::default_for(entry.kind).encode(entry.max_length, &mut record),
        }
        self.storage.write(address, &record)
    }
}

impl<S: Storage + 'static> SettingsStore<S> {
    /// Saves `property` every time its value changes.
    ///
    /// The listener only holds a weak reference to the store: once the
    /// store is dropped, it does nothing.
    pub fn persist_on_change(store: &Rc<RefCell<Self>>, property: &mut Property) -> ListenerId {
        let store = Rc::downgrade(store);
        property.add_listener(move |property: &Property| {
            let Some(store) = store.upgrade() else {
                return;
            };
            let Ok(mut store) = store.try_borrow_mut() else {
                warn!("Settings store busy, `{}` not saved", property.id());
                return;
            };
            if let Err(e) = store.save_property(property) {
                warn!("Unable to save `{}`: {e}", property.id());
            }
        })
    }
}
