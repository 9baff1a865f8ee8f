//! Interpreted subclasses of native types seen from host code through adaptors.

use std::any::Any;
use std::sync::Arc;

use dotrun::prelude::*;

/// Host side view of an interpreted Host.Plugin subclass
struct PluginWrapper {
    instance: AdaptorInstance,
}

impl PluginWrapper {
    fn run(&self, input: i32) -> Result<i32> {
        match self.instance.invoke("Run", &[Value::I32(input)])? {
            Some(value) => value.as_i32(),
            None => Ok(0),
        }
    }
}

struct PluginAdaptor {
    bases: Vec<String>,
}

impl PluginAdaptor {
    fn new() -> Self {
        PluginAdaptor {
            bases: vec!["Host.Plugin".to_string()],
        }
    }
}

impl CrossDomainAdaptor for PluginAdaptor {
    fn base_types(&self) -> &[String] {
        &self.bases
    }

    fn adaptor_type(&self) -> Arc<NativeType> {
        Arc::new(NativeType::class("Host", "PluginAdaptor").extends("Host.Plugin"))
    }

    fn create_instance(&self, instance: AdaptorInstance) -> Result<Arc<dyn Any + Send + Sync>> {
        Ok(Arc::new(PluginWrapper { instance }))
    }
}

fn host_module() -> NativeModule {
    NativeModule::new("Host").with_type(
        NativeType::class("Host", "Plugin").method(
            NativeMethod::new("Run", |_| Ok(Value::I32(0)))
                .instance()
                .virtual_method()
                .param("System.Int32")
                .returns("System.Int32"),
        ),
    )
}

fn plugin_domain() -> Domain {
    let mut builder = ModuleBuilder::new("Plugins");
    let doubler = builder.define_type(TypeDef::class("Plugins", "Doubler").extends(TypeSig::named("Host.Plugin")));
    builder
        .define_method(doubler, MethodDef::constructor().body(MethodBody::new(vec![Instruction::Ret])))
        .unwrap();
    builder
        .define_method(
            doubler,
            MethodDef::new("Run")
                .instance()
                .virtual_method()
                .param(TypeSig::int32())
                .returns(TypeSig::int32())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(1),
                    Instruction::LdcI4(2),
                    Instruction::Mul,
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    // Plugins.Registry::Keep stores a new Doubler in a static field
    let registry = builder.define_type(TypeDef::class("Plugins", "Registry"));
    let current = builder
        .define_field(registry, FieldDef::new_static("current", TypeSig::named("Host.Plugin")))
        .unwrap();
    let doubler_ctor = builder.method_ref(MethodRef::constructor(TypeSig::def(doubler)));
    builder
        .define_method(
            registry,
            MethodDef::new("Keep").body(MethodBody::new(vec![
                Instruction::NewObj(doubler_ctor),
                Instruction::StSFld(current),
                Instruction::Ret,
            ])),
        )
        .unwrap();

    let domain = Domain::builder().native_module(host_module()).build();
    domain.register_adaptor(Arc::new(PluginAdaptor::new())).unwrap();
    domain.load_module(builder.build()).unwrap();
    domain
}

#[test]
fn host_calls_reach_interpreted_override() {
    let domain = plugin_domain();
    let plugin = domain.instantiate("Plugins.Doubler", &[]).unwrap();
    let object = plugin.as_object().unwrap();

    let wrapper = object.adaptor::<PluginWrapper>().unwrap();
    assert_eq!(wrapper.run(21).unwrap(), 42);

    assert!(wrapper.instance.domain().is_ok());
    assert!(wrapper.instance.is_overridden("Run", 1).unwrap());
    assert!(!wrapper.instance.is_overridden("Stop", 0).unwrap());
    assert!(matches!(
        wrapper.instance.invoke("Stop", &[]),
        Err(Error::MethodNotFound { .. })
    ));
}

#[test]
fn virtual_call_on_native_base_dispatches_to_subclass() {
    let domain = plugin_domain();
    let plugin = domain.instantiate("Plugins.Doubler", &[]).unwrap();
    let base_run = domain.find_method("Host.Plugin", "Run", 1).unwrap();
    let result = domain.invoke(&base_run, Some(plugin), &[Value::I32(5)]).unwrap();
    assert_eq!(result.unwrap().as_i32().unwrap(), 10);
}

#[test]
fn wrapper_does_not_keep_the_instance_alive() {
    let domain = plugin_domain();
    let plugin = domain.instantiate("Plugins.Doubler", &[]).unwrap();
    let wrapper = plugin.as_object().unwrap().adaptor::<PluginWrapper>().unwrap();
    drop(plugin);

    assert!(matches!(wrapper.instance.instance(), Err(Error::NullReceiver(_))));
    assert!(wrapper.run(1).is_err());
}

#[test]
fn one_adaptor_per_base_type() {
    let domain = plugin_domain();
    assert!(matches!(
        domain.register_adaptor(Arc::new(PluginAdaptor::new())),
        Err(Error::AdaptorAlreadyRegistered(_))
    ));
}

#[test]
fn adapted_statics_do_not_keep_the_domain_alive() {
    let domain = plugin_domain();
    domain.invoke_by_name("Plugins.Registry", "Keep", None, &[]).unwrap();
    let weak = domain.downgrade();
    assert!(weak.upgrade().is_ok());

    drop(domain);
    assert!(matches!(weak.upgrade(), Err(Error::DomainDropped)));
}
