//! Codegen Module for the Binder Compiler
//!
//! Renders a scheduled unit as the source of its binder class. Everything
//! that decides *what* runs and *when* is already in the `UpdatePlan`; this
//! module only names things and writes them out in plan order.

use crate::allocator::{FlagLayout, INVALIDATE_ANY_NAME};
use crate::br::ALL_PROPERTY;
use crate::error::{GenerationError, Result};
use crate::flag_set::{FlagSet, BUCKET_SIZE};
use crate::kcode::KCode;
use crate::model::{expand_template, ExprId, ExprModel};
use crate::naming::{capitalize, readable_name, NameRegistry, NameScope};
use crate::parse::CompileOptions;
use crate::plan::{Step, UpdatePlan};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

lazy_static! {
    static ref OLD_VALUE_RE: Regex = Regex::new(r"\{old(\d+)\}").unwrap();
}

const VIEW_TYPE: &str = "android.view.View";
const DIRTY_FIELD: &str = "mDirtyFlags";
const DIRTY_LOCAL: &str = "dirtyFlags";

/// `activity_main` becomes `ActivityMainBindingImpl`.
pub fn binder_class_name(layout: &str) -> String {
    let mut name: String = layout
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect();
    name.push_str("BindingImpl");
    name
}

/// Name of bucket `index` of a localized flag set.
fn bucket_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{}_{}", base, index)
    }
}

fn hex(value: u64) -> String {
    format!("{:#x}L", value)
}

/// A settable variable of the binder, with its generated member names.
#[derive(Debug)]
struct Member {
    name: String,
    type_name: String,
    expr: Option<ExprId>,
    field: String,
    setter: String,
    getter: String,
}

struct Emitter<'a> {
    model: &'a ExprModel,
    layout: &'a FlagLayout,
    plan: &'a UpdatePlan,
    options: &'a CompileOptions,
    class_name: String,
    members: Vec<Member>,
    views: Vec<String>,
    locals: Vec<Option<String>>,
    old_fields: IndexMap<ExprId, String>,
    on_change: Vec<String>,
    root_param: String,
    dirty_field: FlagSet,
    dirty_local: FlagSet,
}

/// Source of the binder class for one scheduled unit.
pub fn emit_binder(
    model: &ExprModel,
    layout: &FlagLayout,
    plan: &UpdatePlan,
    options: &CompileOptions,
) -> Result<String> {
    let emitter = Emitter::new(model, layout, plan, options)?;
    let source = emitter.render();
    debug!(layout = %model.layout, bytes = source.len(), "binder emitted");
    Ok(source)
}

impl<'a> Emitter<'a> {
    fn new(
        model: &'a ExprModel,
        layout: &'a FlagLayout,
        plan: &'a UpdatePlan,
        options: &'a CompileOptions,
    ) -> Result<Self> {
        let mut names = NameRegistry::new();
        let localize_error = |e: crate::flag_set::AlreadyLocalized| GenerationError::Consistency {
            layout: model.layout.clone(),
            detail: e.to_string(),
        };

        let mut dirty_field = FlagSet::filled(layout.bucket_count);
        dirty_field.set_dynamic(true);
        dirty_field
            .localize(names.unique(DIRTY_FIELD, NameScope::Flag))
            .map_err(localize_error)?;
        let mut dirty_local = FlagSet::new(layout.bucket_count);
        dirty_local
            .localize(names.unique(DIRTY_LOCAL, NameScope::ExecutePending))
            .map_err(localize_error)?;

        let mut views: Vec<String> = Vec::new();
        for binding in &model.bindings {
            if !views.contains(&binding.target) {
                names.reserve(&binding.target, NameScope::Field);
                views.push(binding.target.clone());
            }
        }

        let root_param = names.unique("root", NameScope::ConstructorParam);

        let mut members: Vec<Member> = Vec::new();
        let declared = model
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.type_name.clone(), v.expr));
        let implicit = model
            .exprs
            .iter()
            .filter(|e| e.is_variable && model.variable_for(e.id).is_none())
            .map(|e| (e.key.clone(), e.type_name.clone(), Some(e.id)));
        for (name, type_name, expr) in declared.chain(implicit) {
            let readable = capitalize(&readable_name(&name));
            members.push(Member {
                field: names.unique(&format!("m{}", readable), NameScope::Field),
                setter: format!("set{}", readable),
                getter: format!("get{}", readable),
                name,
                type_name,
                expr,
            });
        }

        let mut locals = vec![None; model.len()];
        for expr in &model.exprs {
            if expr.needs_local_field() {
                locals[expr.id.index()] =
                    Some(names.unique(&readable_name(&expr.key), NameScope::ExecutePending));
            }
        }

        let mut old_fields = IndexMap::new();
        for block in &plan.old_values {
            for capture in &block.captures {
                if !old_fields.contains_key(capture) {
                    let base = format!("mOld{}", capitalize(&readable_name(&model.expr(*capture).key)));
                    old_fields.insert(*capture, names.unique(&base, NameScope::Field));
                }
            }
        }

        let on_change = layout
            .observables
            .iter()
            .map(|o| {
                let base = format!("onChange{}", capitalize(&readable_name(&model.expr(*o).key)));
                names.unique(&base, NameScope::Method)
            })
            .collect();

        let class_name = model
            .class_name
            .clone()
            .unwrap_or_else(|| binder_class_name(&model.layout));

        Ok(Self {
            model,
            layout,
            plan,
            options,
            class_name,
            members,
            views,
            locals,
            old_fields,
            on_change,
            root_param,
            dirty_field,
            dirty_local,
        })
    }

    fn property(&self, name: &str) -> String {
        format!("{}.{}", self.options.property_table_class, name)
    }

    fn field_name(&self) -> &str {
        self.dirty_field.local_name().unwrap_or(DIRTY_FIELD)
    }

    fn local_name(&self) -> &str {
        self.dirty_local.local_name().unwrap_or(DIRTY_LOCAL)
    }

    fn member_for(&self, id: ExprId) -> Option<&Member> {
        self.members.iter().find(|m| m.expr == Some(id))
    }

    /// Code that yields the value of `id` inside `executeBindings`.
    fn value_code(&self, id: ExprId) -> String {
        if let Some(local) = &self.locals[id.index()] {
            return local.clone();
        }
        if let Some(member) = self.member_for(id) {
            return member.field.clone();
        }
        self.read_code(id)
    }

    /// The expression's template with every child replaced by its value.
    fn read_code(&self, id: ExprId) -> String {
        let expr = self.model.expr(id);
        expand_template(&expr.code, |n| expr.children.get(n).map(|c| self.value_code(*c)))
    }

    /// `(dirtyFlags & 0x3L) != 0`, OR-ed over every bucket the guard uses.
    fn guard(&self, flags: &FlagSet) -> String {
        let base = self.local_name();
        let parts: Vec<String> = flags
            .non_empty_buckets()
            .map(|(index, value)| format!("({} & {}) != 0", bucket_name(base, index), hex(value)))
            .collect();
        match parts.len() {
            0 => "false".to_string(),
            1 => parts.join(""),
            _ => parts
                .iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(" || "),
        }
    }

    /// `target |= 0x..L;` for every bucket `flags` touches.
    fn or_into(&self, code: &mut KCode, target: &str, flags: &FlagSet) {
        for (index, value) in flags.non_empty_buckets() {
            code.nl(format!("{} |= {};", bucket_name(target, index), hex(value)));
        }
    }

    fn dirty_buckets(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.layout.bucket_count).map(|i| bucket_name(self.field_name(), i))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLASS
    // ═══════════════════════════════════════════════════════════════════════════

    fn render(&self) -> String {
        let mut code = KCode::new();
        if !self.model.package.is_empty() {
            code.nl(format!("package {};", self.model.package)).nl("");
        }
        let header = format!(
            "public class {} extends {}",
            self.class_name, self.options.binding_base_class
        );
        code.block(header, |k| {
            self.declare_fields(k);
            k.nl("");
            self.write_constructor(k);
            k.nl("");
            self.write_invalidate_all(k);
            k.nl("");
            self.write_has_pending(k);
            k.nl("");
            self.write_set_variable(k);
            k.nl("");
            self.write_accessors(k);
            self.write_on_field_change(k);
            k.nl("");
            self.write_execute_bindings(k);
            self.write_flag_fields(k);
        });
        code.finish()
    }

    fn declare_fields(&self, k: &mut KCode) {
        k.nl("// views");
        for view in &self.views {
            k.nl(format!("private final {} {};", VIEW_TYPE, view));
        }
        k.nl("// variables");
        for member in &self.members {
            k.nl(format!("private {} {};", member.type_name, member.field));
        }
        k.nl("// values");
        for (id, field) in &self.old_fields {
            k.nl(format!("private {} {};", self.model.expr(*id).type_name, field));
        }
    }

    fn write_constructor(&self, k: &mut KCode) {
        let mut params = vec![
            "androidx.databinding.DataBindingComponent bindingComponent".to_string(),
            format!("{} {}", VIEW_TYPE, self.root_param),
        ];
        params.extend(self.views.iter().map(|v| format!("{} {}", VIEW_TYPE, v)));
        k.block(format!("public {}({})", self.class_name, params.join(", ")), |k| {
            k.nl(format!(
                "super(bindingComponent, {}, {});",
                self.root_param,
                self.layout.observables.len()
            ));
            for view in &self.views {
                k.nl(format!("this.{} = {};", view, view));
            }
            k.nl("invalidateAll();");
        });
    }

    fn write_invalidate_all(&self, k: &mut KCode) {
        k.nl("@Override");
        k.block("public void invalidateAll()", |k| {
            k.block("synchronized(this)", |k| {
                for (index, name) in self.dirty_buckets().enumerate() {
                    k.nl(format!(
                        "{} = {};",
                        name,
                        hex(self.layout.invalidate_any.bucket(index))
                    ));
                }
            });
            k.nl("requestRebind();");
        });
    }

    fn write_has_pending(&self, k: &mut KCode) {
        k.nl("@Override");
        k.block("public boolean hasPendingBindings()", |k| {
            k.block("synchronized(this)", |k| {
                let any: Vec<String> = self.dirty_buckets().map(|b| format!("{} != 0", b)).collect();
                k.block(format!("if ({})", any.join(" || ")), |k| {
                    k.nl("return true;");
                });
            });
            k.nl("return false;");
        });
    }

    fn write_set_variable(&self, k: &mut KCode) {
        k.nl("@Override");
        k.block("public boolean setVariable(int variableId, Object variable)", |k| {
            k.nl("boolean variableSet = true;");
            for (index, member) in self.members.iter().enumerate() {
                let keyword = if index == 0 { "if" } else { "else if" };
                let condition = format!("{} ({} == variableId)", keyword, self.property(&member.name));
                k.block(condition, |k| {
                    k.nl(format!("{}(({}) variable);", member.setter, member.type_name));
                });
            }
            if self.members.is_empty() {
                k.nl("variableSet = false;");
            } else {
                k.block("else", |k| {
                    k.nl("variableSet = false;");
                });
            }
            k.nl("return variableSet;");
        });
    }

    fn write_accessors(&self, k: &mut KCode) {
        for member in &self.members {
            let param = readable_name(&member.name);
            let header = format!("public void {}({} {})", member.setter, member.type_name, param);
            k.block(header, |k| {
                let used = member.expr.filter(|id| self.layout.expr_bit(*id).is_some());
                if let Some(id) = used {
                    if let Some(local_field_id) = self.layout.local_field_id(id) {
                        k.nl(format!("updateRegistration({}, {});", local_field_id, param));
                    }
                }
                k.nl(format!("this.{} = {};", member.field, param));
                if let Some(id) = used {
                    k.block("synchronized(this)", |k| {
                        self.or_into(k, self.field_name(), &self.layout.invalidate_flag_set(id));
                    });
                    k.nl(format!("notifyPropertyChanged({});", self.property(&member.name)));
                    k.nl("super.requestRebind();");
                }
            });
            k.block(format!("public {} {}()", member.type_name, member.getter), |k| {
                k.nl(format!("return {};", member.field));
            });
            k.nl("");
        }
    }

    fn write_on_field_change(&self, k: &mut KCode) {
        k.nl("@Override");
        k.block(
            "protected boolean onFieldChange(int localFieldId, Object object, int fieldId)",
            |k| {
                k.block("switch (localFieldId)", |k| {
                    for (local_field_id, id) in self.layout.observables.iter().enumerate() {
                        k.nl(format!("case {} :", local_field_id));
                        k.tab(format!(
                            "return {}(({}) object, fieldId);",
                            self.on_change[local_field_id],
                            self.model.expr(*id).type_name
                        ));
                    }
                });
                k.nl("return false;");
            },
        );
        for (local_field_id, id) in self.layout.observables.iter().enumerate() {
            self.write_on_change(k, local_field_id, *id);
        }
    }

    fn write_on_change(&self, k: &mut KCode, local_field_id: usize, id: ExprId) {
        let expr = self.model.expr(id);
        // Property name to the flags of the field accesses it dirties.
        let mut properties: IndexMap<&str, FlagSet> = IndexMap::new();
        for link in &expr.dependants {
            let parent = self.model.expr(link.expr);
            if parent.children.first() != Some(&id) || self.layout.expr_bit(parent.id).is_none() {
                continue;
            }
            for property in &parent.bindable_properties {
                properties
                    .entry(property.as_str())
                    .or_insert_with(|| FlagSet::new(self.layout.bucket_count))
                    .or_assign(&self.layout.invalidate_flag_set(parent.id));
            }
        }

        let header = format!(
            "private boolean {}({} {}, int fieldId)",
            self.on_change[local_field_id],
            expr.type_name,
            readable_name(&expr.key)
        );
        k.block(header, |k| {
            k.block(format!("if (fieldId == {})", self.property(ALL_PROPERTY)), |k| {
                k.block("synchronized(this)", |k| {
                    self.or_into(k, self.field_name(), &self.layout.invalidate_flag_set(id));
                });
                k.nl("return true;");
            });
            for (property, flags) in &properties {
                k.block(format!("else if (fieldId == {})", self.property(property)), |k| {
                    k.block("synchronized(this)", |k| {
                        self.or_into(k, self.field_name(), flags);
                    });
                    k.nl("return true;");
                });
            }
            k.nl("return false;");
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTE BINDINGS
    // ═══════════════════════════════════════════════════════════════════════════

    fn write_execute_bindings(&self, k: &mut KCode) {
        k.nl("@Override");
        k.block("protected void executeBindings()", |k| {
            let local = self.local_name().to_string();
            for index in 0..self.layout.bucket_count {
                k.nl(format!("long {} = 0;", bucket_name(&local, index)));
            }
            k.block("synchronized(this)", |k| {
                for (index, field) in self.dirty_buckets().enumerate() {
                    k.nl(format!("{} = {};", bucket_name(&local, index), field));
                    k.nl(format!("{} = 0;", field));
                }
            });
            for id in &self.plan.declarations {
                let expr = self.model.expr(*id);
                let initial = match self.member_for(*id) {
                    Some(member) if expr.is_variable => member.field.clone(),
                    _ => expr.default_value.clone(),
                };
                if let Some(name) = &self.locals[id.index()] {
                    k.nl(format!("{} {} = {};", expr.type_name, name, initial));
                }
            }
            self.write_steps(k, &self.plan.steps);
            self.write_assignments(k);
            self.write_old_values(k);
        });
    }

    fn write_steps(&self, k: &mut KCode, steps: &[Step]) {
        for step in steps {
            match step {
                Step::Guarded { flags, body } => {
                    k.nl("");
                    k.block(format!("if ({})", self.guard(flags)), |k| {
                        self.write_steps(k, body);
                    });
                }
                Step::NullGuarded { operands, body } => {
                    let checks: Vec<String> = operands
                        .iter()
                        .map(|o| format!("{} != null", self.value_code(*o)))
                        .collect();
                    k.block(format!("if ({})", checks.join(" && ")), |k| {
                        self.write_steps(k, body);
                    });
                }
                Step::Read { expr } => {
                    let target = self.value_code(*expr);
                    k.nl(format!("// read {}", self.model.expr(*expr).key));
                    k.nl(format!("{} = {};", target, self.read_code(*expr)));
                }
                Step::Register {
                    expr,
                    local_field_id,
                } => {
                    k.nl(format!(
                        "updateRegistration({}, {});",
                        local_field_id,
                        self.value_code(*expr)
                    ));
                }
                Step::Elevate {
                    predicate,
                    guard,
                    ternaries,
                } => match guard {
                    Some(flags) => {
                        k.block(format!("if({})", self.guard(flags)), |k| {
                            self.write_elevation(k, *predicate, ternaries);
                        });
                    }
                    None => self.write_elevation(k, *predicate, ternaries),
                },
                Step::BatchFinished => {
                    k.nl("// batch finished");
                }
            }
        }
    }

    fn write_elevation(&self, k: &mut KCode, predicate: ExprId, ternaries: &[ExprId]) {
        let value = self.value_code(predicate);
        let test = if self.model.expr(predicate).nullable {
            format!("Boolean.TRUE.equals({})", value)
        } else {
            value
        };
        let mut when_true = FlagSet::new(self.layout.bucket_count);
        let mut when_false = FlagSet::new(self.layout.bucket_count);
        for ternary in ternaries {
            when_true.or_assign(&self.layout.requirement_flags(*ternary, true));
            when_false.or_assign(&self.layout.requirement_flags(*ternary, false));
        }
        let local = self.local_name();
        k.block(format!("if({})", test), |k| {
            self.or_into(k, local, &when_true);
        });
        k.block("else", |k| {
            self.or_into(k, local, &when_false);
        });
    }

    fn write_assignments(&self, k: &mut KCode) {
        for block in &self.plan.assignments {
            k.block(format!("if ({})", self.guard(&block.flags)), |k| {
                for group in &block.api_groups {
                    k.nl(format!("// api target {}", group.min_api));
                    if group.min_api <= self.options.min_api.max(1) {
                        for binding in &group.bindings {
                            k.nl(self.setter_call(*binding));
                        }
                    } else {
                        k.block(format!("if(getBuildSdkInt() >= {})", group.min_api), |k| {
                            for binding in &group.bindings {
                                k.nl(self.setter_call(*binding));
                            }
                        });
                    }
                }
            });
        }
    }

    fn write_old_values(&self, k: &mut KCode) {
        for block in &self.plan.old_values {
            k.block(format!("if ({})", self.guard(&block.flags)), |k| {
                for capture in &block.captures {
                    if let Some(field) = self.old_fields.get(capture) {
                        k.nl(format!("this.{} = {};", field, self.value_code(*capture)));
                    }
                }
            });
        }
    }

    fn setter_call(&self, index: usize) -> String {
        let binding = &self.model.bindings[index];
        let with_target = binding
            .setter
            .replace("{target}", &format!("this.{}", binding.target));
        let with_old = OLD_VALUE_RE.replace_all(&with_target, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| binding.components.get(n))
                .and_then(|c| self.old_fields.get(c))
                .map(|f| format!("this.{}", f))
                .unwrap_or_else(|| caps[0].to_string())
        });
        let call = expand_template(&with_old, |n| {
            binding.components.get(n).map(|c| self.value_code(*c))
        });
        if call.ends_with(';') {
            call
        } else {
            format!("{};", call)
        }
    }

    fn write_flag_fields(&self, k: &mut KCode) {
        k.nl("// dirty flag");
        for (index, name) in self.dirty_buckets().enumerate() {
            k.nl(format!(
                "private long {} = {};",
                name,
                hex(self.dirty_field.bucket(index))
            ));
        }
        if !self.options.emit_flag_mapping {
            k.nl("//end");
            return;
        }
        k.nl("/* flag mapping");
        for (bit, name) in self.layout.mapping.iter().enumerate() {
            let value = 1u64 << (bit % BUCKET_SIZE);
            let label = if bit == 0 { INVALIDATE_ANY_NAME } else { name.as_str() };
            k.tab(format!("flag {} ({}): {}", bit, hex(value), label));
        }
        k.nl("flag mapping end*/");
        k.nl("//end");
    }
}
