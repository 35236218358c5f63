// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::error::Error;

/// Defines the families of sketch classes.
///
/// A family defines a set of classes that share fundamental algorithms and
/// behaviors. The classes within a family may still differ by how they are
/// stored and accessed.
pub(crate) struct Family {
    /// The byte ID for this family.
    pub id: u8,
    /// The name for this family.
    pub name: &'static str,
}

impl Family {
    /// The HLL family of sketches.
    pub const HLL: Family = Family { id: 7, name: "HLL" };

    /// KLL quantiles sketch.
    pub const KLL: Family = Family { id: 15, name: "KLL" };

    /// Compressed Probabilistic Counting (CPC) sketch.
    pub const CPC: Family = Family { id: 16, name: "CPC" };

    pub fn validate_id(&self, family_id: u8) -> Result<(), Error> {
        if family_id != self.id {
            Err(Error::family_mismatch(self.id, family_id, self.name))
        } else {
            Ok(())
        }
    }
}
